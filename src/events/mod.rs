use serde::Serialize;
use tokio::sync::broadcast;

/// Default bounded buffer per subscriber
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Decision-cycle lifecycle events published for observers (dashboards,
/// thought-stream bridges). Transient: never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum CycleEvent {
    ThinkingStarted {
        symbol: String,
        trigger: String,
        reason: String,
    },
    ContextLoaded {
        symbol: String,
        price: f64,
    },
    ThoughtProduced {
        thought: String,
    },
    Consultation {
        consultant: String,
        query: String,
    },
    ActionDispatched {
        action: String,
        outcome: String,
    },
    CycleError {
        message: String,
    },
}

/// Non-blocking publish/subscribe fan-out for observers.
///
/// Built on a bounded broadcast channel: a slow subscriber lags and loses
/// old events, an absent subscriber costs nothing. Publishing never blocks
/// the decision path. Constructed once at the composition root and handed
/// to components explicitly.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<CycleEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(EVENT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Fire-and-forget. A send error only means nobody is listening.
    pub fn publish(&self, event: CycleEvent) {
        let _ = self.sender.send(event);
    }

    /// Register an observer. Call at startup; each receiver gets its own
    /// bounded buffer.
    pub fn subscribe(&self) -> broadcast::Receiver<CycleEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
