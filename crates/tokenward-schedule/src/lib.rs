//! Expiration-driven refresh scheduler for Tokenward.
//!
//! Keeps one cancellable timer per signed-in session that fires a little
//! before the current token expires, triggers a refresh, and re-arms
//! itself from whatever token is current afterwards.
//!
//! # State machine
//!
//! ```text
//!            arm()                 timer fires
//!   Idle ───────────→ Armed ─────────────────────→ Refreshing
//!    ↑                  ↑                              │
//!    │ disarm()         └──── re-plan from current ────┘
//!    └──────────────── (any state)                   token
//! ```
//!
//! What "re-plan" decides is a pure function, [`plan_refresh`]:
//!
//! - no session → go idle;
//! - expiry unknown (token didn't decode) → wait the fallback interval;
//! - refresh moment (`expiry - lead time`) still comfortably ahead → wait for it;
//! - otherwise → refresh **immediately**, with a short retry timer as a
//!   safety net in case that refresh fails or never returns.
//!
//! # Integration
//!
//! The scheduler knows nothing about sessions or identity providers. It
//! talks to a [`RefreshTarget`], which the coordinator implements on top
//! of the session store and the single-flight refresh gate.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// How long before expiry a token is refreshed.
pub const REFRESH_LEAD_TIME: Duration = Duration::from_secs(10 * 60);

/// A planned wait this short or shorter becomes an immediate refresh.
pub const IMMEDIATE_REFRESH_THRESHOLD: Duration = Duration::from_secs(60);

/// Safety-net delay after an immediate refresh that failed or stalled.
pub const RETRY_DELAY: Duration = Duration::from_secs(2 * 60);

/// Refresh interval used when the token's expiry can't be decoded.
pub const FALLBACK_INTERVAL: Duration = Duration::from_secs(30 * 60);

/// Timing knobs for the scheduler.
///
/// The defaults come from the constants above. They were picked from
/// experience rather than derived, so every one of them can be
/// overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    /// How long before expiry to refresh.
    pub refresh_lead_time: Duration,
    /// Planned waits at or below this trigger an immediate refresh.
    pub immediate_threshold: Duration,
    /// Retry delay after a failed or stalled immediate refresh.
    pub retry_delay: Duration,
    /// Interval used when the expiry is unknown.
    pub fallback_interval: Duration,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            refresh_lead_time: REFRESH_LEAD_TIME,
            immediate_threshold: IMMEDIATE_REFRESH_THRESHOLD,
            retry_delay: RETRY_DELAY,
            fallback_interval: FALLBACK_INTERVAL,
        }
    }
}

impl ScheduleConfig {
    /// Replaces values that would make the scheduler spin.
    ///
    /// Called automatically by [`RefreshScheduler::new`]. A zero retry
    /// delay or fallback interval would turn a persistent failure into a
    /// busy loop against the identity provider, so both fall back to
    /// their defaults.
    pub fn validated(mut self) -> Self {
        if self.retry_delay.is_zero() {
            warn!(default = ?RETRY_DELAY, "retry_delay of zero would spin, using default");
            self.retry_delay = RETRY_DELAY;
        }
        if self.fallback_interval.is_zero() {
            warn!(default = ?FALLBACK_INTERVAL, "fallback_interval of zero would spin, using default");
            self.fallback_interval = FALLBACK_INTERVAL;
        }
        self
    }
}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// What the scheduler knows about the current token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// Nobody is signed in.
    NoSession,
    /// The current token expires at this instant.
    At(SystemTime),
    /// There is a token, but its expiry couldn't be decoded.
    Unknown,
}

/// Why a timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArmReason {
    /// `expiry - lead time`.
    Expiry,
    /// Expiry unknown, conservative fixed interval.
    Fallback,
    /// Safety net after an immediate refresh.
    Retry,
}

/// Outcome of [`plan_refresh`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshPlan {
    /// Nothing to refresh.
    Idle,
    /// Sleep, then refresh.
    Wait { delay: Duration, reason: ArmReason },
    /// Refresh right now.
    Immediate,
}

/// Decides when the next refresh should happen.
///
/// Pure: `now` is passed in so callers (and tests) control the clock.
pub fn plan_refresh(expiry: Expiry, now: SystemTime, config: &ScheduleConfig) -> RefreshPlan {
    match expiry {
        Expiry::NoSession => RefreshPlan::Idle,
        Expiry::Unknown => RefreshPlan::Wait {
            delay: config.fallback_interval,
            reason: ArmReason::Fallback,
        },
        Expiry::At(expires_at) => {
            // Already expired → zero, which is below any threshold.
            let remaining = expires_at.duration_since(now).unwrap_or_default();
            let delay = remaining.saturating_sub(config.refresh_lead_time);
            if delay <= config.immediate_threshold {
                RefreshPlan::Immediate
            } else {
                RefreshPlan::Wait {
                    delay,
                    reason: ArmReason::Expiry,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Target
// ---------------------------------------------------------------------------

/// Result of one refresh attempt, as far as scheduling is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    Refreshed,
    Failed,
}

/// The thing being kept fresh.
///
/// `Send + Sync + 'static` because the scheduler's timer task holds an
/// `Arc` to it.
pub trait RefreshTarget: Send + Sync + 'static {
    /// Reads the *current* token's expiry. Called every time the
    /// scheduler re-plans, never cached.
    fn expiry(&self) -> Expiry;

    /// Performs one refresh.
    fn refresh(&self) -> impl Future<Output = AttemptOutcome> + Send;
}

// ---------------------------------------------------------------------------
// State and metrics
// ---------------------------------------------------------------------------

/// Externally visible scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// No timer.
    Idle,
    /// A timer will fire at `deadline`.
    Armed { deadline: Instant, reason: ArmReason },
    /// The timer fired and a refresh is running.
    Refreshing,
}

/// Counters for the scheduler's lifetime (across arm/disarm cycles).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScheduleMetrics {
    /// Refreshes started by the scheduler.
    pub attempts: u64,
    /// Attempts that reported [`AttemptOutcome::Failed`].
    pub failures: u64,
    /// Attempts made without waiting for a timer.
    pub immediate_refreshes: u64,
    /// Timers armed with the fallback interval.
    pub fallback_arms: u64,
    /// Immediate refreshes abandoned because the retry timer fired first.
    pub stalls: u64,
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Cancellable refresh timer for one [`RefreshTarget`].
///
/// At most one timer task exists at a time: [`arm`](Self::arm) always
/// cancels the previous one first. Dropping the scheduler cancels it too.
pub struct RefreshScheduler<T: RefreshTarget> {
    inner: Arc<Inner<T>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct Inner<T> {
    target: Arc<T>,
    config: ScheduleConfig,
    slot: Mutex<Slot>,
}

/// Mutable state shared between the handle and the timer task.
///
/// `epoch` increases on every arm/disarm. A timer task only acts while
/// its own epoch is current, so a task that was aborted but hasn't
/// noticed yet can't refresh on behalf of a session that is gone.
struct Slot {
    epoch: u64,
    state: SchedulerState,
    metrics: ScheduleMetrics,
}

impl<T: RefreshTarget> RefreshScheduler<T> {
    /// Creates an idle scheduler for `target`.
    pub fn new(target: Arc<T>, config: ScheduleConfig) -> Self {
        let config = config.validated();
        debug!(
            lead_secs = config.refresh_lead_time.as_secs(),
            threshold_secs = config.immediate_threshold.as_secs(),
            "refresh scheduler created"
        );
        Self {
            inner: Arc::new(Inner {
                target,
                config,
                slot: Mutex::new(Slot {
                    epoch: 0,
                    state: SchedulerState::Idle,
                    metrics: ScheduleMetrics::default(),
                }),
            }),
            task: Mutex::new(None),
        }
    }

    /// Starts (or restarts) the timer from the target's current expiry.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn arm(&self) {
        let mut task = lock(&self.task);
        if let Some(previous) = task.take() {
            previous.abort();
        }
        let epoch = {
            let mut slot = self.inner.slot();
            slot.epoch += 1;
            slot.state = SchedulerState::Idle;
            slot.epoch
        };
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), epoch)));
    }

    /// Cancels the timer. Safe to call when already idle.
    pub fn disarm(&self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
            debug!("refresh timer cancelled");
        }
        let mut slot = self.inner.slot();
        slot.epoch += 1;
        slot.state = SchedulerState::Idle;
    }

    /// Current state.
    pub fn state(&self) -> SchedulerState {
        self.inner.slot().state
    }

    /// Snapshot of the counters.
    pub fn metrics(&self) -> ScheduleMetrics {
        self.inner.slot().metrics.clone()
    }

    /// The effective (validated) configuration.
    pub fn config(&self) -> &ScheduleConfig {
        &self.inner.config
    }
}

impl<T: RefreshTarget> Drop for RefreshScheduler<T> {
    fn drop(&mut self) {
        if let Some(task) = lock(&self.task).take() {
            task.abort();
        }
    }
}

impl<T> Inner<T> {
    fn slot(&self) -> MutexGuard<'_, Slot> {
        lock(&self.slot)
    }

    /// Sets the state if `epoch` is still current. Returns whether it was.
    fn transition(&self, epoch: u64, state: SchedulerState) -> bool {
        let mut slot = self.slot();
        if slot.epoch != epoch {
            return false;
        }
        slot.state = state;
        true
    }

    fn count(&self, update: impl FnOnce(&mut ScheduleMetrics)) {
        update(&mut self.slot().metrics);
    }
}

fn lock<V>(mutex: &Mutex<V>) -> MutexGuard<'_, V> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The timer task. Runs until the target has no session or the task is
/// superseded.
async fn run<T: RefreshTarget>(inner: Arc<Inner<T>>, epoch: u64) {
    // A token obtained by the previous attempt that already plans as
    // immediate has a lifetime shorter than the lead time.
    let mut last_attempt_refreshed = false;

    loop {
        let mut plan = plan_refresh(inner.target.expiry(), SystemTime::now(), &inner.config);
        if plan == RefreshPlan::Immediate && last_attempt_refreshed {
            warn!(
                lead_secs = inner.config.refresh_lead_time.as_secs(),
                "fresh token already expires within the lead time, backing off"
            );
            plan = RefreshPlan::Wait {
                delay: inner.config.retry_delay,
                reason: ArmReason::Retry,
            };
        }
        last_attempt_refreshed = false;

        match plan {
            RefreshPlan::Idle => {
                inner.transition(epoch, SchedulerState::Idle);
                debug!("no session, refresh scheduler idle");
                return;
            }

            RefreshPlan::Wait { delay, reason } => {
                let deadline = Instant::now() + delay;
                if !inner.transition(epoch, SchedulerState::Armed { deadline, reason }) {
                    return;
                }
                if reason == ArmReason::Fallback {
                    inner.count(|m| m.fallback_arms += 1);
                    info!(
                        delay_secs = delay.as_secs(),
                        "token expiry unknown, using fallback refresh interval"
                    );
                } else {
                    debug!(delay_secs = delay.as_secs(), ?reason, "refresh timer armed");
                }

                time::sleep_until(deadline).await;

                if !inner.transition(epoch, SchedulerState::Refreshing) {
                    return;
                }
                inner.count(|m| m.attempts += 1);
                match inner.target.refresh().await {
                    AttemptOutcome::Refreshed => last_attempt_refreshed = true,
                    AttemptOutcome::Failed => {
                        inner.count(|m| m.failures += 1);
                        warn!("scheduled refresh failed, re-arming from the current token");
                    }
                }
            }

            RefreshPlan::Immediate => {
                if !inner.transition(epoch, SchedulerState::Refreshing) {
                    return;
                }
                inner.count(|m| {
                    m.attempts += 1;
                    m.immediate_refreshes += 1;
                });
                info!("token expires within the refresh threshold, refreshing now");

                let retry_at = Instant::now() + inner.config.retry_delay;
                let refresh = inner.target.refresh();
                tokio::pin!(refresh);

                tokio::select! {
                    outcome = &mut refresh => {
                        if outcome == AttemptOutcome::Refreshed {
                            last_attempt_refreshed = true;
                            continue;
                        }
                        inner.count(|m| m.failures += 1);
                        let armed = SchedulerState::Armed {
                            deadline: retry_at,
                            reason: ArmReason::Retry,
                        };
                        if !inner.transition(epoch, armed) {
                            return;
                        }
                        warn!(
                            retry_secs = inner.config.retry_delay.as_secs(),
                            "immediate refresh failed, retrying after delay"
                        );
                        time::sleep_until(retry_at).await;
                    }
                    () = time::sleep_until(retry_at) => {
                        inner.count(|m| m.stalls += 1);
                        warn!(
                            retry_secs = inner.config.retry_delay.as_secs(),
                            "immediate refresh stalled, trying again"
                        );
                    }
                }
            }
        }
    }
}
