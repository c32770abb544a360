use flume::Sender;

/// Observable orchestrator activity, for logging sinks and tests.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    CursorInitialized {
        room_id: String,
        count: usize,
    },
    TurnDispatched {
        index: usize,
        turn_id: String,
    },
    /// Turns that arrived in the same poll interval but were not dispatched
    BacklogSkipped {
        from_index: usize,
        count: usize,
    },
    PollFailed(String),
    Decision {
        turn_id: String,
        respond: bool,
    },
    ReplyDelivered {
        turn_id: String,
        chunks: usize,
        recorded_turn_id: String,
    },
    NoReply {
        turn_id: String,
    },
    PipelineFailed {
        turn_id: String,
        error: String,
    },
}

pub type EventSender = Sender<OrchestratorEvent>;

pub(crate) fn emit(tx: &EventSender, event: OrchestratorEvent) {
    let _ = tx.send(event);
}
