//! The activation state machine (C8): a single-writer task owning the
//! global enable/disable flag. No shared memory; every transition happens
//! on one task reading from its channels, so the flag is reachable only
//! through message passing.

use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::interval;
use tracing::debug;

const TOGGLE_DEBOUNCE: Duration = Duration::from_secs(10);
const TICK_INTERVAL: Duration = Duration::from_secs(1);

/// `mode=1` flips the current state; `mode=2` forces the state off. Both
/// share the same debounce rule.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToggleMode {
    Flip,
    ForceOff,
}

enum Message {
    Query {
        reply: oneshot::Sender<bool>,
    },
    Toggle {
        mode: ToggleMode,
        delay_secs: u64,
        reply: oneshot::Sender<bool>,
    },
    Set {
        value: bool,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Clone)]
pub struct ActivationHandle {
    tx: mpsc::Sender<Message>,
}

impl ActivationHandle {
    /// Spawns the owning task and returns a cloneable handle to it. Dropping
    /// every handle lets the task exit.
    pub fn spawn() -> Self {
        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(run(rx));
        ActivationHandle { tx }
    }

    pub async fn query(&self) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Query { reply }).await.is_err() {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    pub async fn toggle(&self, mode: ToggleMode, delay_secs: u64) -> bool {
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Message::Toggle {
                mode,
                delay_secs,
                reply,
            })
            .await
            .is_err()
        {
            return true;
        }
        rx.await.unwrap_or(true)
    }

    pub async fn set(&self, value: bool) -> bool {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(Message::Set { value, reply }).await.is_err() {
            return value;
        }
        rx.await.unwrap_or(value)
    }
}

struct State {
    active: bool,
    next_toggle_after: Instant,
    reactivate_at: Option<Instant>,
}

async fn run(mut rx: mpsc::Receiver<Message>) {
    let mut state = State {
        active: true,
        next_toggle_after: Instant::now(),
        reactivate_at: None,
    };
    let mut tick = interval(TICK_INTERVAL);

    loop {
        tokio::select! {
            msg = rx.recv() => {
                match msg {
                    Some(msg) => handle(&mut state, msg),
                    None => return,
                }
            }
            _ = tick.tick() => {
                let now = Instant::now();
                if let Some(r) = state.reactivate_at {
                    if now >= r {
                        state.active = true;
                        state.reactivate_at = None;
                        debug!("activation auto-reactivated");
                    }
                }
            }
        }
    }
}

fn handle(state: &mut State, msg: Message) {
    match msg {
        Message::Query { reply } => {
            let _ = reply.send(state.active);
        }
        Message::Set { value, reply } => {
            state.active = value;
            state.reactivate_at = None;
            let _ = reply.send(state.active);
        }
        Message::Toggle {
            mode,
            delay_secs,
            reply,
        } => {
            let now = Instant::now();
            if now < state.next_toggle_after {
                let _ = reply.send(state.active);
                return;
            }
            match mode {
                ToggleMode::Flip => {
                    state.active = !state.active;
                }
                ToggleMode::ForceOff => {
                    state.active = false;
                }
            }
            state.next_toggle_after = now + TOGGLE_DEBOUNCE;
            state.reactivate_at = if !state.active && delay_secs > 0 {
                Some(now + Duration::from_secs(delay_secs))
            } else {
                None
            };
            let _ = reply.send(state.active);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn toggle_debounces_within_ten_seconds() {
        let handle = ActivationHandle::spawn();
        assert!(handle.query().await);
        assert!(!handle.toggle(ToggleMode::Flip, 0).await);
        // Immediate second toggle is debounced: state does not flip back.
        assert!(!handle.toggle(ToggleMode::Flip, 0).await);
    }

    #[tokio::test]
    async fn set_cancels_pending_reactivation() {
        let handle = ActivationHandle::spawn();
        assert!(!handle.toggle(ToggleMode::ForceOff, 300).await);
        assert!(handle.set(true).await);
        assert!(handle.query().await);
    }

    #[tokio::test]
    async fn timed_reactivation_fires_on_tick() {
        let handle = ActivationHandle::spawn();
        assert!(!handle.toggle(ToggleMode::ForceOff, 1).await);
        tokio::time::sleep(Duration::from_millis(1300)).await;
        assert!(handle.query().await);
    }
}
