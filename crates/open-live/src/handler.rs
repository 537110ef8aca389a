//! Consumer callback interface.

use async_trait::async_trait;

use crate::event::ForwardedMessage;

/// Receives every forwarded chat message.
///
/// Invocations run as independent tracked tasks: they may complete out of order
/// and an error only produces a diagnostic.
#[async_trait]
pub trait DanmuHandler: Send + Sync + 'static {
    async fn on_message(&self, message: ForwardedMessage) -> anyhow::Result<()>;
}
