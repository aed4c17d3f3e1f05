use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

/// A background job that runs every `period` until stopped.
///
/// The first run happens one period after spawning. The task stops when
/// [`PeriodicTask::shutdown`] is awaited or the handle is dropped; a run
/// in progress is allowed to finish.
pub struct PeriodicTask {
    name: String,
    stop: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodicTask {
    pub fn spawn<F, Fut>(name: impl Into<String>, period: Duration, mut job: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let name = name.into();
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        let task_name = name.clone();

        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = ticker.tick() => job().await,
                }
            }
            debug!(task = %task_name, "Periodic task stopped");
        });

        Self {
            name,
            stop: Some(stop_tx),
            handle: Some(handle),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signal the task to stop and wait for it to exit.
    pub async fn shutdown(&mut self) {
        self.signal_stop();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }

    fn signal_stop(&mut self) {
        if let Some(tx) = self.stop.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for PeriodicTask {
    fn drop(&mut self) {
        self.signal_stop();
    }
}
