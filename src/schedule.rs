use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{Local, NaiveDateTime};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{debug, info, warn};

use crate::config::TimeOfDay;
use crate::error::{FrameError, Result};

pub const DAY: Duration = Duration::from_secs(24 * 60 * 60);

pub type AlarmCallback = Arc<dyn Fn() + Send + Sync>;

/// Handle returned by [`RecurringScheduler::schedule_recurring_event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AlarmId(u64);

impl fmt::Display for AlarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "alarm-{}", self.0)
    }
}

/// Runs callbacks at a first delay and then at a fixed period until stopped.
///
/// Each alarm owns a task, so a slow callback only delays its own alarm.
/// Missed ticks are skipped rather than replayed.
#[derive(Clone, Default)]
pub struct RecurringScheduler {
    inner: Arc<SchedulerInner>,
}

#[derive(Default)]
struct SchedulerInner {
    next_id: AtomicU64,
    state: Mutex<SchedulerState>,
}

#[derive(Default)]
struct SchedulerState {
    active: HashMap<AlarmId, Alarm>,
    retired: Vec<(AlarmId, JoinHandle<()>)>,
    disposed: bool,
}

struct Alarm {
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl fmt::Debug for RecurringScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        f.debug_struct("RecurringScheduler")
            .field("active", &state.active.len())
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl RecurringScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `callback` to fire after `first_fire` and then every `period`.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn schedule_recurring_event(
        &self,
        first_fire: Duration,
        period: Duration,
        callback: AlarmCallback,
    ) -> Result<AlarmId> {
        if period.is_zero() {
            return Err(FrameError::Schedule("period must be greater than zero"));
        }
        let mut state = self.state();
        if state.disposed {
            return Err(FrameError::Disposed);
        }

        let id = AlarmId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(
            run_alarm(id, first_fire, period, callback, cancel.clone()).with_current_subscriber(),
        );
        state.active.insert(id, Alarm { cancel, handle });
        debug!(%id, ?first_fire, ?period, "scheduled recurring alarm");
        Ok(id)
    }

    /// Fires `callback` every day at local time `at`.
    pub fn schedule_daily(&self, at: TimeOfDay, callback: AlarmCallback) -> Result<AlarmId> {
        let first_fire = delay_until(Local::now().naive_local(), at);
        info!(%at, delay = %humantime::format_duration(first_fire), "scheduling daily alarm");
        self.schedule_recurring_event(first_fire, DAY, callback)
    }

    /// Cancels an alarm. Unknown or already stopped ids are ignored.
    pub fn stop_event(&self, id: AlarmId) {
        let mut state = self.state();
        state.retired.retain(|(_, handle)| !handle.is_finished());
        match state.active.remove(&id) {
            Some(alarm) => {
                alarm.cancel.cancel();
                state.retired.push((id, alarm.handle));
                debug!(%id, "stopped alarm");
            }
            None => debug!(%id, "stop requested for unknown alarm"),
        }
    }

    pub fn active_count(&self) -> usize {
        self.state().active.len()
    }

    pub fn is_disposed(&self) -> bool {
        self.state().disposed
    }

    /// Cancels every alarm and waits until no callback is running.
    ///
    /// Idempotent; alarms can no longer be scheduled afterwards.
    pub async fn dispose(&self) -> anyhow::Result<()> {
        let handles = {
            let mut state = self.state();
            state.disposed = true;
            let mut handles = std::mem::take(&mut state.retired);
            for (id, alarm) in state.active.drain() {
                alarm.cancel.cancel();
                handles.push((id, alarm.handle));
            }
            handles
        };

        let mut failed = Vec::new();
        for (id, handle) in handles {
            if let Err(err) = handle.await {
                if err.is_panic() {
                    warn!(%id, "alarm callback panicked");
                    failed.push(id.to_string());
                }
            }
        }
        if failed.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("alarm task(s) panicked: {}", failed.join(", ")))
        }
    }

    fn state(&self) -> MutexGuard<'_, SchedulerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

async fn run_alarm(
    id: AlarmId,
    first_fire: Duration,
    period: Duration,
    callback: AlarmCallback,
    cancel: CancellationToken,
) {
    let mut ticks = tokio::time::interval_at(Instant::now() + first_fire, period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticks.tick() => {}
        }
        if cancel.is_cancelled() {
            break;
        }
        debug!(%id, "alarm fired");
        callback();
    }
    debug!(%id, "alarm task finished");
}

/// Time from `now` until the next occurrence of `target`, in `[0, 24h)`.
pub fn delay_until(now: NaiveDateTime, target: TimeOfDay) -> Duration {
    let mut next = now.date().and_time(target.as_naive_time());
    while next < now {
        next += chrono::Duration::days(1);
    }
    (next - now).to_std().unwrap_or(Duration::ZERO)
}
