use crate::Result;
use async_trait::async_trait;

/// Outbound delivery of signal notifications
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, context: &str, message: &str) -> Result<()>;
}

/// Writes notifications to the log
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, context: &str, message: &str) -> Result<()> {
        tracing::info!("📣 {}: {}", context, message);
        Ok(())
    }
}
