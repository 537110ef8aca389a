use std::sync::OnceLock;

use reqwest::Client;
use tracing::debug;

use crate::config::ListenerConfig;
use crate::error::Result;

/// Install the process-wide rustls crypto provider used by reqwest and the WebSocket client.
pub fn install_rustls_provider() {
    static PROVIDER_INSTALLED: OnceLock<()> = OnceLock::new();
    PROVIDER_INSTALLED.get_or_init(|| {
        if let Err(e) = rustls::crypto::aws_lc_rs::default_provider().install_default() {
            // Another crate installed one first.
            debug!(existing_provider = ?e, "rustls CryptoProvider already installed");
        }
    });
}

/// Build the HTTP client used for gateway negotiation.
pub fn build_client(config: &ListenerConfig) -> Result<Client> {
    install_rustls_provider();

    let client = Client::builder()
        .user_agent(config.user_agent.as_str())
        .timeout(config.request_timeout())
        .build()?;
    Ok(client)
}
