use async_trait::async_trait;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::info;

/// Work run on a fixed cadence by [`spawn_periodic`].
#[async_trait]
pub trait PeriodicTask: Send + Sync + 'static {
    fn name(&self) -> &'static str;
    async fn run_once(&self);
}

/// Run `task` every `period` until `shutdown` flips or its sender is dropped.
///
/// Runs never overlap: a run that overshoots the period swallows the ticks it
/// missed instead of bursting to catch up.
pub fn spawn_periodic(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Scheduled {} every {:?}", task.name(), period);

        loop {
            tokio::select! {
                _ = ticker.tick() => task.run_once().await,
                _ = shutdown.changed() => break,
            }
        }

        info!("Stopped {}", task.name());
    })
}
