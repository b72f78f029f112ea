//! Pipeline event system for observability.
//!
//! Emits [`PipelineEvent`]s via a [`tokio::sync::broadcast`] channel so that
//! external observers can follow record traversals without coupling to the
//! engine internals.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::context::StepOutcome;

/// Events emitted while records traverse a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        pipeline: String,
        entry: String,
    },
    NodeEvaluated {
        run_id: Uuid,
        node_id: String,
        step: StepOutcome,
        duration_us: u64,
    },
    RunCompleted {
        run_id: Uuid,
        /// `success`, `dropped` or `failed`.
        status: String,
        /// Terminal node, if the run reached one.
        node_id: Option<String>,
        duration_ms: u64,
    },
}

/// Event emitter wrapping a broadcast sender.
#[derive(Clone)]
pub struct EventEmitter {
    sender: tokio::sync::broadcast::Sender<PipelineEvent>,
}

impl EventEmitter {
    /// Create a new emitter with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all current subscribers.
    ///
    /// If there are no active receivers the event is silently dropped.
    pub fn emit(&self, event: PipelineEvent) {
        let _ = self.sender.send(event);
    }

    /// Subscribe to events. Returns a broadcast receiver.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventEmitter {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for EventEmitter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventEmitter")
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emitter_sends_and_receives() {
        let emitter = EventEmitter::new(16);
        let mut rx = emitter.subscribe();
        let run_id = Uuid::new_v4();

        emitter.emit(PipelineEvent::RunStarted {
            run_id,
            pipeline: "orders".into(),
            entry: "check".into(),
        });

        match rx.recv().await.unwrap() {
            PipelineEvent::RunStarted {
                run_id: got,
                pipeline,
                entry,
            } => {
                assert_eq!(got, run_id);
                assert_eq!(pipeline, "orders");
                assert_eq!(entry, "check");
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn multiple_subscribers_receive_same_event() {
        let emitter = EventEmitter::new(16);
        let mut rx1 = emitter.subscribe();
        let mut rx2 = emitter.subscribe();

        emitter.emit(PipelineEvent::NodeEvaluated {
            run_id: Uuid::new_v4(),
            node_id: "n1".into(),
            step: StepOutcome::Transformed,
            duration_us: 12,
        });

        let json1 = serde_json::to_string(&rx1.recv().await.unwrap()).unwrap();
        let json2 = serde_json::to_string(&rx2.recv().await.unwrap()).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn emit_with_no_subscribers_does_not_panic() {
        let emitter = EventEmitter::new(16);
        emitter.emit(PipelineEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            status: "failed".into(),
            node_id: None,
            duration_ms: 0,
        });
    }

    #[test]
    fn event_serialization_round_trip() {
        let event = PipelineEvent::RunCompleted {
            run_id: Uuid::new_v4(),
            status: "dropped".into(),
            node_id: Some("discard".into()),
            duration_ms: 3,
        };

        let json = serde_json::to_string(&event).unwrap();
        match serde_json::from_str(&json).unwrap() {
            PipelineEvent::RunCompleted {
                status,
                node_id,
                duration_ms,
                ..
            } => {
                assert_eq!(status, "dropped");
                assert_eq!(node_id.as_deref(), Some("discard"));
                assert_eq!(duration_ms, 3);
            }
            other => panic!("unexpected variant after round-trip: {:?}", other),
        }
    }
}
