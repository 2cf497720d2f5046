//! Per-timelapse capture timers.
//!
//! Each running timelapse owns one recurring timer task; a pending timelapse
//! with a future start time owns one one-shot task. The registry holding the
//! task handles is in memory only: [`CaptureScheduler::recover`] rebuilds it
//! from durable timelapse statuses at startup.

use crate::clock::Clock;
use crate::db::models::{Timelapse, TimelapseStatus};
use crate::db::store::Store;
use crate::error::Error;
use crate::recorder::executor::CaptureExecutor;
use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

struct RecurringTimer {
    handle: JoinHandle<()>,
    paused: Arc<AtomicBool>,
    generation: u64,
}

struct PendingStart {
    handle: JoinHandle<()>,
    generation: u64,
}

#[derive(Default)]
struct Registry {
    recurring: HashMap<Uuid, RecurringTimer>,
    pending_starts: HashMap<Uuid, PendingStart>,
    next_generation: u64,
    shut_down: bool,
}

impl Registry {
    fn generation(&mut self) -> u64 {
        self.next_generation += 1;
        self.next_generation
    }
}

struct SchedulerInner {
    store: Arc<dyn Store>,
    executor: Arc<CaptureExecutor>,
    clock: Arc<dyn Clock>,
    registry: Mutex<Registry>,
}

/// How many timers [`CaptureScheduler::recover`] rebuilt
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub started: usize,
    pub scheduled: usize,
}

/// Owns every capture timer
#[derive(Clone)]
pub struct CaptureScheduler {
    inner: Arc<SchedulerInner>,
}

impl CaptureScheduler {
    pub fn new(store: Arc<dyn Store>, executor: Arc<CaptureExecutor>, clock: Arc<dyn Clock>) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                executor,
                clock,
                registry: Mutex::new(Registry::default()),
            }),
        }
    }

    /// Install a recurring timer that fires now and then every
    /// `interval_seconds`. Replaces any existing timer and cancels a pending
    /// scheduled start.
    pub async fn start(&self, timelapse_id: Uuid, interval_seconds: i32) {
        self.inner.start(timelapse_id, interval_seconds).await
    }

    /// Install a one-shot timer that starts a pending timelapse at `at`
    pub async fn schedule_start(&self, timelapse_id: Uuid, at: DateTime<Utc>, interval_seconds: i32) {
        self.inner.schedule_start(timelapse_id, at, interval_seconds).await
    }

    /// Suspend the recurring timer. No-op when there is none.
    pub async fn pause(&self, timelapse_id: Uuid) {
        info!("Pausing capture for timelapse {}", timelapse_id);
        let registry = self.inner.registry.lock().await;
        if let Some(timer) = registry.recurring.get(&timelapse_id) {
            timer.paused.store(true, Ordering::SeqCst);
        }
    }

    /// Re-activate the recurring timer, or rebuild it from the stored
    /// interval when none exists (e.g. after a restart while paused).
    pub async fn resume(&self, timelapse_id: Uuid) -> Result<()> {
        info!("Resuming capture for timelapse {}", timelapse_id);
        {
            let registry = self.inner.registry.lock().await;
            if let Some(timer) = registry.recurring.get(&timelapse_id) {
                timer.paused.store(false, Ordering::SeqCst);
                return Ok(());
            }
        }

        if let Some(timelapse) = self.inner.store.get_timelapse(&timelapse_id).await? {
            self.inner.start(timelapse_id, timelapse.interval_seconds).await;
        }
        Ok(())
    }

    /// Remove both timers of a timelapse. A capture already in flight is not
    /// interrupted.
    pub async fn stop(&self, timelapse_id: Uuid) {
        info!("Stopping capture jobs for timelapse {}", timelapse_id);
        let mut registry = self.inner.registry.lock().await;
        if let Some(timer) = registry.recurring.remove(&timelapse_id) {
            timer.handle.abort();
        }
        if let Some(pending) = registry.pending_starts.remove(&timelapse_id) {
            pending.handle.abort();
        }
    }

    /// Carry out the scheduler side of a status change
    pub async fn apply(&self, timelapse_id: Uuid, action: ScheduleAction) -> Result<()> {
        match action {
            ScheduleAction::None => {}
            ScheduleAction::Start { interval_seconds } => {
                self.start(timelapse_id, interval_seconds).await
            }
            ScheduleAction::ScheduleStart {
                at,
                interval_seconds,
            } => self.schedule_start(timelapse_id, at, interval_seconds).await,
            ScheduleAction::Pause => self.pause(timelapse_id).await,
            ScheduleAction::Resume => self.resume(timelapse_id).await?,
            ScheduleAction::Stop => self.stop(timelapse_id).await,
        }
        Ok(())
    }

    /// Rebuild the timers from durable state: running timelapses start
    /// ticking, pending ones with a future start get their one-shot back.
    pub async fn recover(&self) -> Result<RecoveryReport> {
        let mut report = RecoveryReport::default();

        for timelapse in self
            .inner
            .store
            .list_timelapses_by_status(TimelapseStatus::Running)
            .await?
        {
            info!("Resuming capture for running timelapse {}", timelapse.id);
            self.start(timelapse.id, timelapse.interval_seconds).await;
            report.started += 1;
        }

        let now = self.inner.clock.now();
        for timelapse in self
            .inner
            .store
            .list_timelapses_by_status(TimelapseStatus::Pending)
            .await?
        {
            if let Some(at) = timelapse.scheduled_start(now) {
                self.schedule_start(timelapse.id, at, timelapse.interval_seconds)
                    .await;
                report.scheduled += 1;
            }
        }

        info!(
            "Capture scheduler recovered {} running and {} scheduled timelapse(s)",
            report.started, report.scheduled
        );
        Ok(report)
    }

    /// Abort every timer and refuse new ones
    pub async fn shutdown(&self) {
        info!("Shutting down capture scheduler");
        let mut registry = self.inner.registry.lock().await;
        registry.shut_down = true;
        for (_, timer) in registry.recurring.drain() {
            timer.handle.abort();
        }
        for (_, pending) in registry.pending_starts.drain() {
            pending.handle.abort();
        }
    }

    pub async fn is_scheduled(&self, timelapse_id: Uuid) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .recurring
            .contains_key(&timelapse_id)
    }

    pub async fn is_paused(&self, timelapse_id: Uuid) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .recurring
            .get(&timelapse_id)
            .map_or(false, |timer| timer.paused.load(Ordering::SeqCst))
    }

    pub async fn has_pending_start(&self, timelapse_id: Uuid) -> bool {
        self.inner
            .registry
            .lock()
            .await
            .pending_starts
            .contains_key(&timelapse_id)
    }
}

impl SchedulerInner {
    async fn start(self: &Arc<Self>, timelapse_id: Uuid, interval_seconds: i32) {
        info!(
            "Starting capture for timelapse {} every {}s",
            timelapse_id, interval_seconds
        );
        let mut registry = self.registry.lock().await;
        if registry.shut_down {
            warn!("Scheduler is shut down, not starting timelapse {}", timelapse_id);
            return;
        }

        if let Some(pending) = registry.pending_starts.remove(&timelapse_id) {
            pending.handle.abort();
        }
        if let Some(previous) = registry.recurring.remove(&timelapse_id) {
            previous.handle.abort();
        }

        let generation = registry.generation();
        let paused = Arc::new(AtomicBool::new(false));
        let period = Duration::from_secs(interval_seconds.max(1) as u64);
        let handle = tokio::spawn(run_recurring(
            Arc::downgrade(self),
            timelapse_id,
            period,
            paused.clone(),
            generation,
        ));

        registry.recurring.insert(
            timelapse_id,
            RecurringTimer {
                handle,
                paused,
                generation,
            },
        );
    }

    async fn schedule_start(self: &Arc<Self>, timelapse_id: Uuid, at: DateTime<Utc>, interval_seconds: i32) {
        info!("Scheduling auto-start for timelapse {} at {}", timelapse_id, at);
        let mut registry = self.registry.lock().await;
        if registry.shut_down {
            warn!("Scheduler is shut down, not scheduling timelapse {}", timelapse_id);
            return;
        }

        if let Some(previous) = registry.pending_starts.remove(&timelapse_id) {
            previous.handle.abort();
        }

        let delay = (at - self.clock.now()).to_std().unwrap_or(Duration::ZERO);
        let generation = registry.generation();
        let handle = tokio::spawn(run_pending_start(
            Arc::downgrade(self),
            timelapse_id,
            delay,
            interval_seconds,
            generation,
        ));

        registry
            .pending_starts
            .insert(timelapse_id, PendingStart { handle, generation });
    }

    /// Drop the registry entry of a timer that is finishing on its own. The
    /// generation check keeps a replacement timer registered.
    async fn release_recurring(&self, timelapse_id: Uuid, generation: u64) {
        let mut registry = self.registry.lock().await;
        if registry
            .recurring
            .get(&timelapse_id)
            .map_or(false, |timer| timer.generation == generation)
        {
            registry.recurring.remove(&timelapse_id);
        }
    }

    async fn release_pending_start(&self, timelapse_id: Uuid, generation: u64) -> bool {
        let mut registry = self.registry.lock().await;
        if registry
            .pending_starts
            .get(&timelapse_id)
            .map_or(false, |pending| pending.generation == generation)
        {
            registry.pending_starts.remove(&timelapse_id);
            true
        } else {
            false
        }
    }

    async fn auto_start(self: &Arc<Self>, timelapse_id: Uuid, interval_seconds: i32) -> Result<()> {
        let Some(timelapse) = self.store.get_timelapse(&timelapse_id).await? else {
            return Ok(());
        };
        if timelapse.status != TimelapseStatus::Pending {
            return Ok(());
        }

        if timelapse.has_ended(self.clock.now()) {
            if self
                .store
                .transition_timelapse(&timelapse_id, TimelapseStatus::Pending, TimelapseStatus::Completed)
                .await?
            {
                warn!(
                    "Timelapse {} scheduled start fired but end time already passed - completing",
                    timelapse_id
                );
            }
            return Ok(());
        }

        if !self
            .store
            .transition_timelapse(&timelapse_id, TimelapseStatus::Pending, TimelapseStatus::Running)
            .await?
        {
            return Ok(());
        }

        info!("Auto-starting timelapse {}", timelapse_id);
        self.start(timelapse_id, interval_seconds).await;
        Ok(())
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let registry = self.registry.get_mut();
        for (_, timer) in registry.recurring.drain() {
            timer.handle.abort();
        }
        for (_, pending) in registry.pending_starts.drain() {
            pending.handle.abort();
        }
    }
}

async fn run_recurring(
    inner: Weak<SchedulerInner>,
    timelapse_id: Uuid,
    period: Duration,
    paused: Arc<AtomicBool>,
    generation: u64,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        ticker.tick().await;
        if paused.load(Ordering::SeqCst) {
            continue;
        }

        let Some(scheduler) = inner.upgrade() else {
            break;
        };
        let executor = scheduler.executor.clone();
        drop(scheduler);

        // A separate task keeps a panic inside the capture from killing the
        // timer, and awaiting it keeps captures of one timelapse sequential.
        match tokio::spawn(async move { executor.execute(timelapse_id).await }).await {
            Ok(outcome) if outcome.ends_timer() => {
                if let Some(scheduler) = inner.upgrade() {
                    scheduler.release_recurring(timelapse_id, generation).await;
                }
                info!("Capture timer for timelapse {} finished", timelapse_id);
                break;
            }
            Ok(_) => {}
            Err(e) => error!("Capture task for timelapse {} panicked: {}", timelapse_id, e),
        }
    }
}

async fn run_pending_start(
    inner: Weak<SchedulerInner>,
    timelapse_id: Uuid,
    delay: Duration,
    interval_seconds: i32,
    generation: u64,
) {
    tokio::time::sleep(delay).await;

    let Some(scheduler) = inner.upgrade() else {
        return;
    };
    // Detach first so that start() does not abort this very task
    if !scheduler.release_pending_start(timelapse_id, generation).await {
        return;
    }
    if let Err(e) = scheduler.auto_start(timelapse_id, interval_seconds).await {
        error!("Scheduled start of timelapse {} failed: {:#}", timelapse_id, e);
    }
}

/// Scheduler call implied by a timelapse change
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleAction {
    None,
    Start { interval_seconds: i32 },
    ScheduleStart { at: DateTime<Utc>, interval_seconds: i32 },
    Pause,
    Resume,
    Stop,
}

impl ScheduleAction {
    /// Action for a freshly created timelapse
    pub fn for_new(timelapse: &Timelapse, now: DateTime<Utc>) -> Self {
        match timelapse.status {
            TimelapseStatus::Running => ScheduleAction::Start {
                interval_seconds: timelapse.interval_seconds,
            },
            TimelapseStatus::Pending => match timelapse.scheduled_start(now) {
                Some(at) => ScheduleAction::ScheduleStart {
                    at,
                    interval_seconds: timelapse.interval_seconds,
                },
                None => ScheduleAction::None,
            },
            _ => ScheduleAction::None,
        }
    }

    /// Action for a user update from `before` to `after`. Rejects status
    /// edges the lifecycle does not allow.
    pub fn plan(before: &Timelapse, after: &Timelapse, now: DateTime<Utc>) -> Result<Self, Error> {
        use TimelapseStatus::*;

        if !before.status.can_transition_to(after.status) {
            return Err(Error::InvalidState(format!(
                "Timelapse {} cannot move from {} to {}",
                before.id, before.status, after.status
            )));
        }

        let interval_changed = before.interval_seconds != after.interval_seconds;
        let start_changed = before.started_at != after.started_at;
        let start = ScheduleAction::Start {
            interval_seconds: after.interval_seconds,
        };

        Ok(match (before.status, after.status) {
            (Completed, Completed) => ScheduleAction::None,
            (_, Completed) => ScheduleAction::Stop,
            (Pending, Running) => start,
            (Running, Paused) => ScheduleAction::Pause,
            (Paused, Running) if interval_changed => start,
            (Paused, Running) => ScheduleAction::Resume,
            (Running, Running) if interval_changed => start,
            (Pending, Pending) if start_changed || interval_changed => {
                match after.scheduled_start(now) {
                    Some(at) => ScheduleAction::ScheduleStart {
                        at,
                        interval_seconds: after.interval_seconds,
                    },
                    None => ScheduleAction::Stop,
                }
            }
            _ => ScheduleAction::None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::fake::FakeFrameSource;
    use crate::capture::CaptureError;
    use crate::db::models::Settings;
    use crate::recorder::testing::Fixture;
    use chrono::Duration as ChronoDuration;

    async fn frames(fx: &Fixture, id: Uuid) -> u64 {
        fx.store.count_frames(&id).await.unwrap()
    }

    async fn status(fx: &Fixture, id: Uuid) -> TimelapseStatus {
        fx.store.get_timelapse(&id).await.unwrap().unwrap().status
    }

    async fn sleep_secs(secs: u64) {
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn start_fires_immediately_then_every_interval() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        assert_eq!(frames(&fx, t.id).await, 1);

        sleep_secs(5).await;
        assert_eq!(frames(&fx, t.id).await, 2);

        sleep_secs(10).await;
        assert_eq!(frames(&fx, t.id).await, 4);
        assert!(scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn start_replaces_existing_timer() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        // Each start fires immediately; the replaced timer never ticks again
        assert!(frames(&fx, t.id).await <= 2);
        let before = frames(&fx, t.id).await;

        sleep_secs(5).await;
        assert_eq!(frames(&fx, t.id).await, before + 1);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_skips_ticks_and_resume_keeps_cadence() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        scheduler.pause(t.id).await;
        fx.store.set_timelapse_status(&t.id, TimelapseStatus::Paused).unwrap();
        assert!(scheduler.is_paused(t.id).await);

        sleep_secs(10).await;
        assert_eq!(frames(&fx, t.id).await, 1);

        // t = 11s: the next tick of the original cadence is at 15s
        fx.store.set_timelapse_status(&t.id, TimelapseStatus::Running).unwrap();
        scheduler.resume(t.id).await.unwrap();
        assert!(!scheduler.is_paused(t.id).await);
        sleep_secs(2).await;
        assert_eq!(frames(&fx, t.id).await, 1);
        sleep_secs(3).await;
        assert_eq!(frames(&fx, t.id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn pause_without_timer_does_not_create_one() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Paused, 5);
        let scheduler = fx.scheduler();

        scheduler.pause(t.id).await;
        scheduler.pause(t.id).await;
        assert!(!scheduler.is_scheduled(t.id).await);
        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Paused);
    }

    #[tokio::test(start_paused = true)]
    async fn resume_without_timer_rebuilds_from_store() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 7);
        let scheduler = fx.scheduler();

        scheduler.resume(t.id).await.unwrap();
        assert!(scheduler.is_scheduled(t.id).await);
        sleep_secs(1).await;
        assert_eq!(frames(&fx, t.id).await, 1);
        sleep_secs(7).await;
        assert_eq!(frames(&fx, t.id).await, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_cancels_both_timers() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.stop(t.id).await;
        scheduler.start(t.id, 5).await;
        scheduler
            .schedule_start(t.id, fx.clock.now() + ChronoDuration::hours(1), 5)
            .await;
        sleep_secs(1).await;

        scheduler.stop(t.id).await;
        scheduler.stop(t.id).await;
        assert!(!scheduler.is_scheduled(t.id).await);
        assert!(!scheduler.has_pending_start(t.id).await);

        let captured = frames(&fx, t.id).await;
        sleep_secs(30).await;
        assert_eq!(frames(&fx, t.id).await, captured);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_start_flips_pending_to_running() {
        let fx = Fixture::new();
        let mut t = fx.timelapse(TimelapseStatus::Pending, 5);
        let start_at = fx.clock.now() + ChronoDuration::hours(1);
        t.started_at = Some(start_at);
        fx.store.insert_timelapse(t.clone()).unwrap();
        let scheduler = fx.scheduler();

        scheduler.apply(t.id, ScheduleAction::for_new(&t, fx.clock.now())).await.unwrap();
        tokio::task::yield_now().await;
        assert!(scheduler.has_pending_start(t.id).await);
        assert_eq!(frames(&fx, t.id).await, 0);

        sleep_secs(3599).await;
        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Pending);
        assert_eq!(frames(&fx, t.id).await, 0);

        sleep_secs(2).await;
        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Running);
        assert!(frames(&fx, t.id).await >= 1);
        assert!(scheduler.is_scheduled(t.id).await);
        assert!(!scheduler.has_pending_start(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_start_after_end_time_completes_directly() {
        let fx = Fixture::new();
        let mut t = fx.timelapse(TimelapseStatus::Pending, 5);
        t.started_at = Some(fx.clock.now() + ChronoDuration::seconds(10));
        t.ended_at = Some(fx.clock.now() + ChronoDuration::seconds(5));
        fx.store.insert_timelapse(t.clone()).unwrap();
        let scheduler = fx.scheduler();

        scheduler
            .schedule_start(t.id, t.started_at.unwrap(), 5)
            .await;
        sleep_secs(11).await;

        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Completed);
        assert_eq!(frames(&fx, t.id).await, 0);
        assert_eq!(fx.source.calls(), 0);
        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn scheduled_start_ignores_timelapse_no_longer_pending() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Pending, 5);
        let scheduler = fx.scheduler();

        scheduler
            .schedule_start(t.id, fx.clock.now() + ChronoDuration::seconds(10), 5)
            .await;
        fx.store.set_timelapse_status(&t.id, TimelapseStatus::Completed).unwrap();
        sleep_secs(11).await;

        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Completed);
        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn end_time_auto_completes_and_removes_timer() {
        let fx = Fixture::new();
        let mut t = fx.timelapse(TimelapseStatus::Running, 5);
        t.ended_at = Some(fx.clock.now() + ChronoDuration::seconds(12));
        fx.store.insert_timelapse(t.clone()).unwrap();
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(16).await;

        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Completed);
        assert_eq!(frames(&fx, t.id).await, 3);
        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn frame_cap_stops_timer() {
        let fx = Fixture::new();
        fx.store
            .set_settings(Some(Settings {
                max_frames_per_timelapse: Some(2),
                ..fx.settings()
            }))
            .unwrap();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(11).await;

        assert_eq!(frames(&fx, t.id).await, 2);
        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Completed);
        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn failing_capture_keeps_timer_alive() {
        let fx = Fixture::new();
        fx.source.push(Err(CaptureError::Timeout { seconds: 10 }));
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        assert_eq!(frames(&fx, t.id).await, 0);
        assert!(scheduler.is_scheduled(t.id).await);

        sleep_secs(5).await;
        assert_eq!(frames(&fx, t.id).await, 1);
        assert_eq!(status(&fx, t.id).await, TimelapseStatus::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_capture_never_overlaps() {
        let fx = Fixture::with_source(FakeFrameSource::with_delay(Duration::from_secs(12)));
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(11).await;
        // The ticks at 5s and 10s fell inside the first capture
        assert_eq!(fx.source.calls(), 1);
        assert_eq!(frames(&fx, t.id).await, 0);

        // First capture ends at 12s and the late tick fires once right away
        sleep_secs(2).await;
        assert_eq!(frames(&fx, t.id).await, 1);
        assert_eq!(fx.source.calls(), 2);

        sleep_secs(10).await;
        assert_eq!(fx.source.calls(), 2);
        assert_eq!(frames(&fx, t.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn recover_rebuilds_timers_from_durable_state() {
        let fx = Fixture::new();
        let running = fx.timelapse(TimelapseStatus::Running, 5);
        let paused = fx.timelapse(TimelapseStatus::Paused, 5);
        let completed = fx.timelapse(TimelapseStatus::Completed, 5);

        let mut future = fx.timelapse(TimelapseStatus::Pending, 5);
        future.started_at = Some(fx.clock.now() + ChronoDuration::minutes(10));
        fx.store.insert_timelapse(future.clone()).unwrap();

        let mut past = fx.timelapse(TimelapseStatus::Pending, 5);
        past.started_at = Some(fx.clock.now() - ChronoDuration::minutes(10));
        fx.store.insert_timelapse(past.clone()).unwrap();

        let scheduler = fx.scheduler();
        let report = scheduler.recover().await.unwrap();
        assert_eq!(report, RecoveryReport { started: 1, scheduled: 1 });

        assert!(scheduler.is_scheduled(running.id).await);
        assert!(scheduler.has_pending_start(future.id).await);
        for id in [paused.id, completed.id, past.id] {
            assert!(!scheduler.is_scheduled(id).await);
            assert!(!scheduler.has_pending_start(id).await);
        }

        sleep_secs(1).await;
        assert_eq!(frames(&fx, running.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_aborts_and_refuses_new_timers() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();

        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        scheduler.shutdown().await;
        assert!(!scheduler.is_scheduled(t.id).await);

        scheduler.start(t.id, 5).await;
        assert!(!scheduler.is_scheduled(t.id).await);
        sleep_secs(20).await;
        assert_eq!(frames(&fx, t.id).await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn completed_timelapse_has_no_timer_after_apply() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();
        scheduler.start(t.id, 5).await;

        let mut after = t.clone();
        after.status = TimelapseStatus::Completed;
        let action = ScheduleAction::plan(&t, &after, fx.clock.now()).unwrap();
        assert_eq!(action, ScheduleAction::Stop);
        scheduler.apply(t.id, action).await.unwrap();

        assert!(!scheduler.is_scheduled(t.id).await);
    }

    #[tokio::test(start_paused = true)]
    async fn timer_left_behind_a_completed_row_releases_itself() {
        let fx = Fixture::new();
        let t = fx.timelapse(TimelapseStatus::Running, 5);
        let scheduler = fx.scheduler();
        scheduler.start(t.id, 5).await;
        sleep_secs(1).await;
        assert_eq!(frames(&fx, t.id).await, 1);

        // Completed behind the scheduler's back, with the timer still installed
        assert!(fx
            .store
            .transition_timelapse(&t.id, TimelapseStatus::Running, TimelapseStatus::Completed)
            .await
            .unwrap());
        assert!(scheduler.is_scheduled(t.id).await);

        sleep_secs(5).await;
        assert!(!scheduler.is_scheduled(t.id).await);
        assert_eq!(frames(&fx, t.id).await, 1);
    }

    fn timelapse_with(status: TimelapseStatus) -> Timelapse {
        Timelapse {
            id: Uuid::new_v4(),
            camera_id: Uuid::new_v4(),
            name: "plan".to_string(),
            interval_seconds: 5,
            status,
            started_at: None,
            ended_at: None,
            size_bytes: 0,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn plan_maps_status_edges() {
        use TimelapseStatus::*;
        let now = Utc::now();

        let cases = [
            (Pending, Running, ScheduleAction::Start { interval_seconds: 5 }),
            (Running, Paused, ScheduleAction::Pause),
            (Paused, Running, ScheduleAction::Resume),
            (Running, Completed, ScheduleAction::Stop),
            (Paused, Completed, ScheduleAction::Stop),
            (Pending, Completed, ScheduleAction::Stop),
            (Running, Running, ScheduleAction::None),
            (Completed, Completed, ScheduleAction::None),
        ];
        for (from, to, expected) in cases {
            let before = timelapse_with(from);
            let mut after = before.clone();
            after.status = to;
            assert_eq!(ScheduleAction::plan(&before, &after, now).unwrap(), expected);
        }
    }

    #[test]
    fn plan_rejects_backward_edges() {
        use TimelapseStatus::*;
        let now = Utc::now();

        for (from, to) in [(Completed, Running), (Running, Pending), (Pending, Paused)] {
            let before = timelapse_with(from);
            let mut after = before.clone();
            after.status = to;
            assert!(matches!(
                ScheduleAction::plan(&before, &after, now),
                Err(Error::InvalidState(_))
            ));
        }
    }

    #[test]
    fn plan_restarts_on_interval_change_and_reschedules_on_start_change() {
        let now = Utc::now();

        let before = timelapse_with(TimelapseStatus::Running);
        let mut after = before.clone();
        after.interval_seconds = 30;
        assert_eq!(
            ScheduleAction::plan(&before, &after, now).unwrap(),
            ScheduleAction::Start { interval_seconds: 30 }
        );

        let before = timelapse_with(TimelapseStatus::Pending);
        let mut after = before.clone();
        let at = now + ChronoDuration::hours(2);
        after.started_at = Some(at);
        assert_eq!(
            ScheduleAction::plan(&before, &after, now).unwrap(),
            ScheduleAction::ScheduleStart { at, interval_seconds: 5 }
        );

        let mut cleared = after.clone();
        cleared.started_at = None;
        assert_eq!(
            ScheduleAction::plan(&after, &cleared, now).unwrap(),
            ScheduleAction::Stop
        );
    }
}
