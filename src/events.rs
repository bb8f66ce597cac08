//! Progress events keyed by Job id.
//!
//! Every event is logged through `tracing` with a `job_id` field and, when a
//! streaming layer subscribed, broadcast as a [`ProgressEvent`].

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

/// One human-readable status line.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ProgressEvent {
    pub job_id: String,
    pub at: DateTime<Utc>,
    pub message: String,
}

/// Emits progress for exactly one Job.
#[derive(Debug, Clone)]
pub struct EventSink {
    job_id: String,
    tx: Option<broadcast::Sender<ProgressEvent>>,
}

impl EventSink {
    pub fn new(job_id: impl Into<String>, tx: Option<broadcast::Sender<ProgressEvent>>) -> Self {
        Self {
            job_id: job_id.into(),
            tx,
        }
    }

    /// A sink that only logs.
    pub fn logging(job_id: impl Into<String>) -> Self {
        Self::new(job_id, None)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn emit(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(job_id = %self.job_id, "{}", message);
        self.send(message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(job_id = %self.job_id, "{}", message);
        self.send(message);
    }

    fn send(&self, message: String) {
        if let Some(tx) = &self.tx {
            // No receivers is fine: nobody is streaming this job.
            let _ = tx.send(ProgressEvent {
                job_id: self.job_id.clone(),
                at: Utc::now(),
                message,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_broadcast_in_order() {
        let (tx, mut rx) = broadcast::channel(16);
        let sink = EventSink::new("job-1", Some(tx));
        sink.emit("sandbox ready");
        sink.warn("iteration 1 rejected");

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.job_id, "job-1");
        assert_eq!(first.message, "sandbox ready");
        assert_eq!(second.message, "iteration 1 rejected");
    }

    #[test]
    fn emit_without_receivers_does_not_panic() {
        let (tx, rx) = broadcast::channel(4);
        drop(rx);
        EventSink::new("job-2", Some(tx)).emit("nobody listening");
        EventSink::logging("job-3").emit("log only");
    }

    #[test]
    fn progress_event_serializes_job_id() {
        let event = ProgressEvent {
            job_id: "j".into(),
            at: Utc::now(),
            message: "m".into(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["job_id"], "j");
        assert_eq!(json["message"], "m");
    }
}
