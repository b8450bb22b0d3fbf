//! Typed in-process event bus connecting the pipeline stages.
//!
//! Stages never call each other directly: the webhook receiver emits
//! `CodePushed`, the puller emits `CodePulled`, and a single dispatcher
//! consumes both. Payload shape is checked at compile time instead of by
//! string-keyed convention.

use tokio::sync::mpsc;

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Payload carried by every pipeline event. `commit` is set once by the
/// webhook receiver and never changes for the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunPayload {
    pub run_id: String,
    pub commit: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineEvent {
    CodePushed(RunPayload),
    CodePulled(RunPayload),
}

/// Emitter half of the bus. Cheap to clone; held in shared state.
#[derive(Clone)]
pub struct EventBus {
    pushed_tx: mpsc::Sender<RunPayload>,
    pulled_tx: mpsc::Sender<RunPayload>,
}

/// Receiver half of the bus, owned by the pipeline dispatcher.
pub struct EventStream {
    pushed_rx: mpsc::Receiver<RunPayload>,
    pulled_rx: mpsc::Receiver<RunPayload>,
}

impl EventBus {
    pub fn new() -> (EventBus, EventStream) {
        let (pushed_tx, pushed_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (pulled_tx, pulled_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        (
            EventBus {
                pushed_tx,
                pulled_tx,
            },
            EventStream {
                pushed_rx,
                pulled_rx,
            },
        )
    }

    /// Emits an event; resolves once the bus has accepted it for delivery.
    /// Returns false if the dispatcher side is gone.
    pub async fn emit(&self, event: PipelineEvent) -> bool {
        match event {
            PipelineEvent::CodePushed(payload) => self.pushed_tx.send(payload).await.is_ok(),
            PipelineEvent::CodePulled(payload) => self.pulled_tx.send(payload).await.is_ok(),
        }
    }
}

impl EventStream {
    /// Next event to dispatch, or None once all emitters are dropped.
    ///
    /// `CodePulled` is drained ahead of `CodePushed` so a run already in
    /// flight finishes its deploy stage before a newer run starts pulling.
    pub async fn next(&mut self) -> Option<PipelineEvent> {
        tokio::select! {
            biased;
            Some(payload) = self.pulled_rx.recv() => Some(PipelineEvent::CodePulled(payload)),
            Some(payload) = self.pushed_rx.recv() => Some(PipelineEvent::CodePushed(payload)),
            else => None,
        }
    }

    /// Non-blocking variant of [`EventStream::next`].
    pub fn try_next(&mut self) -> Option<PipelineEvent> {
        if let Ok(payload) = self.pulled_rx.try_recv() {
            return Some(PipelineEvent::CodePulled(payload));
        }
        if let Ok(payload) = self.pushed_rx.try_recv() {
            return Some(PipelineEvent::CodePushed(payload));
        }
        None
    }
}
