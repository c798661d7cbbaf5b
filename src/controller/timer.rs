//! Timer tasks feeding the controller inbox
//!
//! Timers never touch controller state. They only post inputs tagged with
//! the id of the timer that produced them; the controller decides whether
//! that timer is still current.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use super::machine::Input;

/// The single repeating action of a running pattern. Dropping it aborts
/// the task.
pub(super) struct BlinkTimer {
    id: u64,
    handle: JoinHandle<()>,
}

impl BlinkTimer {
    /// Post `Input::Tick` every `period`, first one a full period from now
    pub fn repeating(id: u64, period: Duration, inbox: mpsc::Sender<Input>) -> Self {
        let first = Instant::now() + period;
        let handle = tokio::spawn(async move {
            let mut interval = time::interval_at(first, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                interval.tick().await;
                if inbox.send(Input::Tick { timer_id: id }).await.is_err() {
                    break;
                }
            }
        });

        Self { id, handle }
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for BlinkTimer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Post `input` once after `delay`. Not cancellable.
pub(super) fn defer(delay: Duration, inbox: mpsc::Sender<Input>, input: Input) {
    let deadline = Instant::now() + delay;
    tokio::spawn(async move {
        time::sleep_until(deadline).await;
        let _ = inbox.send(input).await;
    });
}
