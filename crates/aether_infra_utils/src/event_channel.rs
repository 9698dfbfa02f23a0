use std::sync::Mutex;

use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

/// A single-topic publish/subscribe channel.
///
/// Values are delivered to every live subscriber in publish order. A channel
/// created with [`EventChannel::with_replay`] hands the most recently
/// published value to each new subscriber before any subsequent publication.
/// Dropping an [`EventSubscription`] unsubscribes; closed subscribers are
/// pruned on the next publish.
pub struct EventChannel<T: Clone> {
    state: Mutex<ChannelState<T>>,
    replay_last: bool,
}

struct ChannelState<T> {
    subscribers: Vec<UnboundedSender<T>>,
    last: Option<T>,
}

impl<T: Clone> EventChannel<T> {
    pub fn new() -> Self {
        Self { state: Mutex::new(ChannelState { subscribers: Vec::new(), last: None }), replay_last: false }
    }

    pub fn with_replay() -> Self {
        Self { state: Mutex::new(ChannelState { subscribers: Vec::new(), last: None }), replay_last: true }
    }

    pub fn publish(&self, value: T) {
        let mut state = self.state.lock().expect("Event channel state lock poisoned.");
        if self.replay_last {
            state.last = Some(value.clone());
        }
        state.subscribers.retain(|subscriber| subscriber.send(value.clone()).is_ok());
    }

    pub fn subscribe(&self) -> EventSubscription<T> {
        let (tx, rx) = unbounded_channel();
        let mut state = self.state.lock().expect("Event channel state lock poisoned.");
        if self.replay_last {
            if let Some(last) = &state.last {
                // Cannot fail: the matching receiver is alive in this scope.
                let _ = tx.send(last.clone());
            }
        }
        state.subscribers.push(tx);
        EventSubscription { rx }
    }

    /// The most recently published value, if the channel replays.
    pub fn last(&self) -> Option<T> {
        self.state.lock().expect("Event channel state lock poisoned.").last.clone()
    }
}

impl<T: Clone> Default for EventChannel<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct EventSubscription<T> {
    rx: UnboundedReceiver<T>,
}

impl<T> EventSubscription<T> {
    /// Awaits the next published value; `None` once the channel is dropped.
    pub async fn recv(&mut self) -> Option<T> {
        self.rx.recv().await
    }

    /// Returns an already-delivered value without awaiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.rx.try_recv()
    }
}
