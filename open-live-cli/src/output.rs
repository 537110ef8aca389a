//! Writes forwarded chat messages to stdout.

use std::io::{self, Write};

use async_trait::async_trait;
use open_live::{DanmuHandler, ForwardedMessage};
use parking_lot::Mutex;

/// Prints every message as JSON, one object per line unless `pretty` is set.
pub struct JsonLinesHandler<W> {
    writer: Mutex<W>,
    pretty: bool,
}

impl JsonLinesHandler<io::Stdout> {
    pub fn stdout(pretty: bool) -> Self {
        Self::new(io::stdout(), pretty)
    }
}

impl<W: Write> JsonLinesHandler<W> {
    pub fn new(writer: W, pretty: bool) -> Self {
        Self {
            writer: Mutex::new(writer),
            pretty,
        }
    }

    fn write_message(&self, message: &ForwardedMessage) -> anyhow::Result<()> {
        let line = if self.pretty {
            serde_json::to_string_pretty(message)?
        } else {
            serde_json::to_string(message)?
        };

        let mut writer = self.writer.lock();
        writeln!(writer, "{}", line)?;
        writer.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<W: Write + Send + 'static> DanmuHandler for JsonLinesHandler<W> {
    async fn on_message(&self, message: ForwardedMessage) -> anyhow::Result<()> {
        self.write_message(&message)
    }
}
