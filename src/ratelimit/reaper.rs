//! Background sweeping of expired counter records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

use super::backend::CounterStore;
use crate::error::{Result, TurnstileError};

/// Handle to a running sweep task.
///
/// The task wakes every `interval`, deletes records whose window has closed
/// and exits when [`Reaper::shutdown`] is called. Sweeps never block live
/// checks beyond the per-shard locking the store already does.
#[derive(Debug)]
pub struct Reaper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl Reaper {
    /// Spawn a sweep task over `store` on the current Tokio runtime.
    pub fn spawn<S>(store: Arc<S>, interval: Duration) -> Self
    where
        S: CounterStore + ?Sized + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(run(store, interval, shutdown_rx));

        info!(interval_secs = interval.as_secs_f64(), "Reaper started");

        Self {
            shutdown_tx,
            handle,
        }
    }

    /// Whether the sweep task is still running.
    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(self) -> Result<()> {
        // The receiver only goes away if the task already ended.
        let _ = self.shutdown_tx.send(true);

        self.handle
            .await
            .map_err(|e| TurnstileError::Reaper(e.to_string()))?;

        info!("Reaper stopped");
        Ok(())
    }
}

async fn run<S>(store: Arc<S>, period: Duration, mut shutdown: watch::Receiver<bool>)
where
    S: CounterStore + ?Sized,
{
    // First sweep one full period after start.
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let now = store.now();
                let removed = store.sweep(now).await;
                debug!(removed = removed, "Swept expired counters");
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }
}
