use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc::WeakSender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::message::Input;
use crate::bridge::Scheduler;
use crate::bridge::Timer;
use crate::bridge::TimerKind;

/// Runs bridge timers as tokio tasks that post the expiry back into the
/// engine's input channel.
///
/// Holds only a weak sender so pending timers do not keep the engine
/// alive.
pub struct TokioScheduler {
    input: WeakSender<Input>,
    tasks: HashMap<TimerKind, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new(input: WeakSender<Input>) -> Self {
        Self {
            input,
            tasks: HashMap::new(),
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, timer: Timer, after: Duration) {
        let input = self.input.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(tx) = input.upgrade() else {
                return;
            };
            if tx.send(Input::Timer(timer)).await.is_err() {
                debug!("Engine stopped before {:?} timer fired", timer.kind);
            }
        });
        if let Some(previous) = self.tasks.insert(timer.kind, task) {
            previous.abort();
        }
    }

    fn cancel(&mut self, kind: TimerKind) {
        if let Some(task) = self.tasks.remove(&kind) {
            task.abort();
        }
    }
}

impl Drop for TokioScheduler {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}
