use std::time::Duration;

use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tokio::time::{sleep_until, Instant};

/// Collapses bursts of signals into at most one delivery per `window`, keeping
/// both edges: the first signal of a burst is delivered immediately (leading),
/// and the latest signal arriving inside the window is delivered once the
/// window elapses (trailing).
///
/// Dropping the [`Debouncer`] closes the input; a pending trailing delivery is
/// still flushed at its due time before the worker exits.
pub struct Debouncer<T> {
    tx: UnboundedSender<T>,
}

impl<T: Send + 'static> Debouncer<T> {
    pub fn new(window: Duration) -> (Self, UnboundedReceiver<T>) {
        let (in_tx, in_rx) = unbounded_channel();
        let (out_tx, out_rx) = unbounded_channel();
        tokio::spawn(run_debounce(window, in_rx, out_tx));
        (Self { tx: in_tx }, out_rx)
    }

    /// Feeds a signal into the debouncer. Signals sent after the output
    /// receiver is dropped are discarded.
    pub fn signal(&self, value: T) {
        let _ = self.tx.send(value);
    }
}

async fn run_debounce<T>(
    window: Duration,
    mut in_rx: UnboundedReceiver<T>,
    out_tx: UnboundedSender<T>,
) {
    let mut last_fire: Option<Instant> = None;
    let mut pending: Option<T> = None;
    loop {
        let trailing_due = match (&pending, last_fire) {
            (Some(_), Some(fired_at)) => Some(fired_at + window),
            _ => None,
        };
        tokio::select! {
            received = in_rx.recv() => {
                match received {
                    Some(value) => match last_fire {
                        // Inside the window: coalesce into the trailing slot.
                        Some(fired_at) if Instant::now() < fired_at + window => {
                            pending = Some(value);
                        }
                        _ => {
                            last_fire = Some(Instant::now());
                            if out_tx.send(value).is_err() {
                                return;
                            }
                        }
                    },
                    None => {
                        if let (Some(value), Some(due)) = (pending.take(), trailing_due) {
                            sleep_until(due).await;
                            let _ = out_tx.send(value);
                        }
                        return;
                    }
                }
            }
            // The guard keeps this branch disabled unless a trailing delivery is armed.
            () = async { sleep_until(trailing_due.expect("Branch disabled when unarmed.")).await },
                if trailing_due.is_some() =>
            {
                if let Some(value) = pending.take() {
                    last_fire = Some(Instant::now());
                    if out_tx.send(value).is_err() {
                        return;
                    }
                }
            }
        }
    }
}
