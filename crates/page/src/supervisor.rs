//! Keeps the artifact applied after the host page rebuilds itself.
//!
//! A small state machine: `Idle` until started, `Watching` while observing
//! the target, `Reapplying` for the duration of a pipeline run, `Stopped`
//! on teardown. Watching either polls `is_applied` on an interval
//! (aggressive profiles, bounded by a maximum check count) or parks on the
//! target's mutation notification. Loss of the artifact, an in-page
//! navigation, and regained visibility all funnel through one throttled
//! reapplication entry point, so injection churn cannot feed back into an
//! observer storm.

use std::sync::Arc;
use std::time::Duration;

use restyler_core::AppConfig;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::pipeline::StylePipeline;
use crate::target::StyleTarget;

/// Supervisor lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    Idle,
    Watching,
    Reapplying,
    Stopped,
}

/// Watches one pipeline's target and re-runs the pipeline on drift.
pub struct Supervisor<T: StyleTarget + 'static> {
    pipeline: Arc<StylePipeline<T>>,
    state: Arc<RwLock<SupervisorState>>,
    shutdown: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
    poll: Duration,
    throttle: Duration,
    max_checks: u32,
}

impl<T: StyleTarget + 'static> Supervisor<T> {
    pub fn new(pipeline: Arc<StylePipeline<T>>, config: &AppConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            pipeline,
            state: Arc::new(RwLock::new(SupervisorState::Idle)),
            shutdown,
            handle: None,
            poll: config.supervisor_poll(),
            throttle: config.supervisor_throttle(),
            max_checks: config.supervisor_max_checks,
        }
    }

    pub async fn state(&self) -> SupervisorState {
        *self.state.read().await
    }

    /// Start watching. A second start while running is a no-op.
    pub async fn start(&mut self) {
        if self.handle.is_some() {
            return;
        }

        *self.state.write().await = SupervisorState::Watching;

        let pipeline = Arc::clone(&self.pipeline);
        let state = Arc::clone(&self.state);
        let shutdown = self.shutdown.subscribe();
        let poll = self.poll;
        let throttle = self.throttle;
        let max_checks = self.max_checks;

        tracing::debug!(
            profile = %self.pipeline.profile().name,
            aggressive = self.pipeline.profile().aggressive_supervision,
            "supervision started"
        );

        self.handle = Some(tokio::spawn(async move {
            watch_loop(pipeline, state, shutdown, poll, throttle, max_checks).await;
        }));
    }

    /// Tear down: signal the watcher, wait for it, release its timers.
    pub async fn stop(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
        *self.state.write().await = SupervisorState::Stopped;
        tracing::debug!(profile = %self.pipeline.profile().name, "supervision stopped");
    }
}

async fn watch_loop<T: StyleTarget + 'static>(
    pipeline: Arc<StylePipeline<T>>,
    state: Arc<RwLock<SupervisorState>>,
    mut shutdown: watch::Receiver<bool>,
    poll: Duration,
    throttle: Duration,
    max_checks: u32,
) {
    let profile_name = pipeline.profile().name.clone();
    let aggressive = pipeline.profile().aggressive_supervision;
    let target = Arc::clone(pipeline.target());

    let mut checks = 0u32;
    let mut last_attempt: Option<Instant> = None;
    let mut last_url = target.current_url().await;
    let mut was_visible = target.is_visible().await;

    loop {
        if aggressive {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(poll) => {}
            }
            checks += 1;
            if checks > max_checks {
                tracing::info!(profile = %profile_name, max_checks, "check limit reached, stopping supervision");
                break;
            }
        } else {
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = target.wait_for_mutation(poll) => {}
            }
        }

        if *shutdown.borrow() {
            break;
        }

        if !pipeline.cache().is_enabled(&profile_name).await {
            tracing::info!(profile = %profile_name, "styling disabled, stopping supervision");
            break;
        }

        let url = target.current_url().await;
        let url_changed = url != last_url;
        last_url = url;

        let visible = target.is_visible().await;
        let visibility_regained = visible && !was_visible;
        was_visible = visible;

        let missing = !pipeline.is_applied().await;

        if !(missing || url_changed || visibility_regained) {
            continue;
        }

        // Single throttled entry point for every trigger: injection churn
        // wakes the mutation waiter, and without spacing that would loop.
        if let Some(at) = last_attempt
            && at.elapsed() < throttle
        {
            tracing::debug!(profile = %profile_name, "reapplication throttled");
            continue;
        }
        last_attempt = Some(Instant::now());

        tracing::info!(
            profile = %profile_name,
            missing,
            url_changed,
            visibility_regained,
            "artifact drift detected, reapplying"
        );

        *state.write().await = SupervisorState::Reapplying;
        if !pipeline.run_once().await {
            tracing::warn!(profile = %profile_name, "reapplication failed, supervision continues");
        }
        *state.write().await = SupervisorState::Watching;
    }

    *state.write().await = SupervisorState::Stopped;
}
