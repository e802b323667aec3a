//! Stage timing for deployments.

use std::time::{Duration, Instant};

use tokio::{sync::oneshot, task::JoinHandle};

use crate::deployer::DeployStage;

/// Longest interval between two checks of the warning timer.
const WARN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Records which stage a deployment is in and for how long.
#[derive(Debug)]
pub struct StageTracker {
    chain_name: String,
    started: Instant,
    stage: DeployStage,
    stage_started: Instant,
    completed: Vec<(DeployStage, Duration)>,
}

impl StageTracker {
    pub fn new(chain_name: impl Into<String>) -> Self {
        let now = Instant::now();
        Self {
            chain_name: chain_name.into(),
            started: now,
            stage: DeployStage::Idle,
            stage_started: now,
            completed: Vec::new(),
        }
    }

    /// Enter `stage` before attempting it, closing the current one.
    pub fn enter(&mut self, stage: DeployStage) {
        let spent = self.stage_started.elapsed();
        tracing::debug!(
            chain = %self.chain_name,
            from = %self.stage,
            to = %stage,
            elapsed_ms = spent.as_millis() as u64,
            "Deployment stage transition"
        );
        self.completed.push((self.stage, spent));
        self.stage = stage;
        self.stage_started = Instant::now();
    }

    pub fn stage(&self) -> DeployStage {
        self.stage
    }

    /// Time spent in the current stage.
    pub fn stage_elapsed(&self) -> Duration {
        self.stage_started.elapsed()
    }

    /// Time since the deployment began.
    pub fn total_elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Completed stages and the time spent in each.
    pub fn history(&self) -> &[(DeployStage, Duration)] {
        &self.completed
    }

    /// Start a background timer that logs a warning once the current stage has
    /// run for `warn_after`. The timer never cancels the stage.
    pub fn warn_if_slow(&self, warn_after: Duration, limit: Duration) -> SlowStageWarning {
        SlowStageWarning::spawn(
            self.chain_name.clone(),
            self.stage,
            self.stage_started,
            warn_after,
            limit,
        )
    }
}

/// Handle of a running slow-stage warning timer.
///
/// Call [`SlowStageWarning::stop`] before using the stage result.
pub struct SlowStageWarning {
    done: oneshot::Sender<()>,
    handle: JoinHandle<bool>,
}

impl SlowStageWarning {
    fn spawn(
        chain_name: String,
        stage: DeployStage,
        since: Instant,
        warn_after: Duration,
        limit: Duration,
    ) -> Self {
        let (done, mut done_rx) = oneshot::channel::<()>();
        let poll = WARN_POLL_INTERVAL.min(warn_after.max(Duration::from_millis(10)));

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll);
            let mut warned = false;
            loop {
                tokio::select! {
                    _ = &mut done_rx => return warned,
                    _ = ticker.tick() => {
                        let elapsed = since.elapsed();
                        if !warned && elapsed >= warn_after {
                            tracing::warn!(
                                chain = %chain_name,
                                %stage,
                                elapsed_secs = elapsed.as_secs(),
                                limit_secs = limit.as_secs(),
                                "Stage is taking longer than expected, still waiting"
                            );
                            warned = true;
                        }
                    }
                }
            }
        });

        Self { done, handle }
    }

    /// Stop the timer and wait for it to finish. Returns whether it warned.
    pub async fn stop(self) -> bool {
        let _ = self.done.send(());
        self.handle.await.unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_history() {
        let mut tracker = StageTracker::new("zoo");
        tracker.enter(DeployStage::ConnectedToControlPlane);
        tracker.enter(DeployStage::NetworkHealthVerified);

        assert_eq!(tracker.stage(), DeployStage::NetworkHealthVerified);
        let stages: Vec<_> = tracker.history().iter().map(|(s, _)| *s).collect();
        assert_eq!(
            stages,
            vec![DeployStage::Idle, DeployStage::ConnectedToControlPlane]
        );
    }

    #[tokio::test]
    async fn test_warning_fires_for_slow_stage() {
        let tracker = StageTracker::new("zoo");
        let timer = tracker.warn_if_slow(Duration::from_millis(20), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_millis(150)).await;

        assert!(timer.stop().await);
    }

    #[tokio::test]
    async fn test_no_warning_for_fast_stage() {
        let tracker = StageTracker::new("zoo");
        let timer = tracker.warn_if_slow(Duration::from_secs(30), Duration::from_secs(60));

        assert!(!timer.stop().await);
    }
}
