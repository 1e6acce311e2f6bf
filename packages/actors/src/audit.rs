//! Audit sink that fans events out to supervisor subscribers.

use lifecycle_core::{AuditError, AuditSink, JobEvent, TracingAuditSink};
use tokio::sync::broadcast;

/// Logs every event and forwards it on a broadcast channel.
///
/// Having no subscribers is not an error; the event is still logged.
#[derive(Debug, Clone)]
pub struct BroadcastAuditSink {
    tx: broadcast::Sender<JobEvent>,
}

impl BroadcastAuditSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn sender(&self) -> broadcast::Sender<JobEvent> {
        self.tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastAuditSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl AuditSink for BroadcastAuditSink {
    fn emit(&self, event: &JobEvent) -> Result<(), AuditError> {
        TracingAuditSink.emit(event)?;
        let _ = self.tx.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifecycle_core::JobKey;

    #[tokio::test]
    async fn subscribers_receive_events() -> Result<(), Box<dyn std::error::Error>> {
        let sink = BroadcastAuditSink::new(8);
        let event = JobEvent::JobEnqueued {
            key: JobKey::parse("acme", "job_1")?,
            timestamp: Utc::now(),
        };

        // no receivers yet
        sink.emit(&event)?;

        let mut rx = sink.subscribe();
        sink.emit(&event)?;
        assert_eq!(rx.recv().await?, event);
        Ok(())
    }
}
