//! Adaptive polling scheduler.
//!
//! One process-wide scheduler drives periodic status queries for every
//! registered device. Each entry carries two periods, one for *active* mode
//! (a user is interacting with the room) and one for *inactive* mode (idle),
//! so the same device can be polled every few seconds during a meeting and
//! every few minutes overnight.
//!
//! The scheduler wakes on a fixed tick whose length depends on the mode and
//! fires every entry whose own period has elapsed, to within half a tick, since
//! it last fired. Entries that have never fired are due on the first tick. A
//! tick works on a snapshot of the due entries, so entries added or removed by
//! a firing poll take effect on the next tick.
//!
//! # Example
//! ```no_run
//! # async fn example(target: std::sync::Arc<dyn hwsync::scheduler::PollTarget>) -> hwsync::SyncResult<()> {
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hwsync::scheduler::{PollingMode, PollingScheduler, SchedulerConfig};
//!
//! let scheduler = Arc::new(PollingScheduler::new(SchedulerConfig::default())?);
//! scheduler.add_polling(target, "Power", None, Some(Duration::from_secs(5)), None);
//! let driver = scheduler.spawn();
//! scheduler.start_polling(PollingMode::Active);
//! // ...
//! scheduler.shutdown();
//! driver.await.ok();
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{SyncError, SyncResult};
use crate::value::Qualifier;

// =============================================================================
// Poll Targets
// =============================================================================

/// Something the scheduler can poll. Implemented by device controllers.
#[async_trait]
pub trait PollTarget: Send + Sync {
    /// Stable identifier; entries are keyed by `(target_id, command)`.
    fn target_id(&self) -> &str;

    /// Query `command` once.
    ///
    /// An unanswered query is not an error. `Err` is logged by the scheduler
    /// and does not affect other entries.
    async fn poll(&self, command: &str, qualifier: &Qualifier) -> SyncResult<()>;
}

// =============================================================================
// Modes
// =============================================================================

/// Polling cadence selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PollingMode {
    /// Short periods while the system is in use
    Active,
    /// Long periods while idle
    Inactive,
}

impl FromStr for PollingMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "active" => Ok(PollingMode::Active),
            "inactive" => Ok(PollingMode::Inactive),
            _ => Err(SyncError::InvalidMode(s.to_string())),
        }
    }
}

impl fmt::Display for PollingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollingMode::Active => f.write_str("active"),
            PollingMode::Inactive => f.write_str("inactive"),
        }
    }
}

/// Scheduler run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerMode {
    /// No ticks fire
    Stopped,
    /// Ticking with active periods
    Active,
    /// Ticking with inactive periods
    Inactive,
}

impl SchedulerMode {
    /// Cadence in effect, or `None` when stopped.
    pub fn polling_mode(self) -> Option<PollingMode> {
        match self {
            SchedulerMode::Stopped => None,
            SchedulerMode::Active => Some(PollingMode::Active),
            SchedulerMode::Inactive => Some(PollingMode::Inactive),
        }
    }
}

impl From<PollingMode> for SchedulerMode {
    fn from(mode: PollingMode) -> Self {
        match mode {
            PollingMode::Active => SchedulerMode::Active,
            PollingMode::Inactive => SchedulerMode::Inactive,
        }
    }
}

impl fmt::Display for SchedulerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.polling_mode() {
            Some(mode) => write!(f, "{mode}"),
            None => f.write_str("stopped"),
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Wake-up period in active mode
    #[serde(default = "default_active_tick", with = "humantime_serde")]
    pub active_tick: Duration,
    /// Wake-up period in inactive mode
    #[serde(default = "default_inactive_tick", with = "humantime_serde")]
    pub inactive_tick: Duration,
    /// Entry period used when an active period is not given
    #[serde(default = "default_active_period", with = "humantime_serde")]
    pub default_active: Duration,
    /// Entry period used when an inactive period is not given
    #[serde(default = "default_inactive_period", with = "humantime_serde")]
    pub default_inactive: Duration,
    /// Mode entered on startup ("active" or "inactive")
    #[serde(default = "default_initial_mode")]
    pub initial_mode: String,
}

fn default_active_tick() -> Duration {
    Duration::from_secs(10)
}

fn default_inactive_tick() -> Duration {
    Duration::from_secs(600)
}

fn default_active_period() -> Duration {
    Duration::from_secs(10)
}

fn default_inactive_period() -> Duration {
    Duration::from_secs(600)
}

fn default_initial_mode() -> String {
    "active".to_string()
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            active_tick: default_active_tick(),
            inactive_tick: default_inactive_tick(),
            default_active: default_active_period(),
            default_inactive: default_inactive_period(),
            initial_mode: default_initial_mode(),
        }
    }
}

impl SchedulerConfig {
    /// Tick period for `mode`.
    pub fn tick_for(&self, mode: PollingMode) -> Duration {
        match mode {
            PollingMode::Active => self.active_tick,
            PollingMode::Inactive => self.inactive_tick,
        }
    }

    /// Reject zero tick or default periods.
    ///
    /// # Errors
    /// [`SyncError::Configuration`] naming the first zero field.
    pub fn validate(&self) -> SyncResult<()> {
        let fields = [
            ("active_tick", self.active_tick),
            ("inactive_tick", self.inactive_tick),
            ("default_active", self.default_active),
            ("default_inactive", self.default_inactive),
        ];
        for (name, period) in fields {
            if period.is_zero() {
                return Err(SyncError::Configuration(format!(
                    "Polling period '{name}' must be greater than zero"
                )));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Entries
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct PollKey {
    target: String,
    command: String,
}

struct EntryState {
    target: Arc<dyn PollTarget>,
    qualifier: Qualifier,
    active: Duration,
    inactive: Duration,
    last_fired: Option<Instant>,
}

impl EntryState {
    fn period(&self, mode: PollingMode) -> Duration {
        match mode {
            PollingMode::Active => self.active,
            PollingMode::Inactive => self.inactive,
        }
    }

    /// Due when the period has elapsed, give or take `slack`.
    fn is_due(&self, mode: PollingMode, now: Instant, slack: Duration) -> bool {
        self.last_fired.map_or(true, |at| {
            now.saturating_duration_since(at) + slack >= self.period(mode)
        })
    }
}

/// Read-only view of one polling entry.
#[derive(Debug, Clone, PartialEq)]
pub struct PollingEntry {
    /// Owning target
    pub target_id: String,
    /// Polled command
    pub command: String,
    /// Qualifier passed to every poll
    pub qualifier: Qualifier,
    /// Period in active mode
    pub active: Duration,
    /// Period in inactive mode
    pub inactive: Duration,
}

struct DuePoll {
    target: Arc<dyn PollTarget>,
    command: String,
    qualifier: Qualifier,
}

// =============================================================================
// Scheduler
// =============================================================================

/// Process-wide polling scheduler.
///
/// Entry bookkeeping and mode changes are synchronous and may be called from
/// any task, including from inside a firing poll.
pub struct PollingScheduler {
    config: SchedulerConfig,
    entries: Mutex<BTreeMap<PollKey, EntryState>>,
    mode: watch::Sender<SchedulerMode>,
    shutdown: watch::Sender<bool>,
    /// Held while a tick fires; ticks never overlap.
    firing: tokio::sync::Mutex<()>,
}

impl PollingScheduler {
    /// Stopped scheduler with no entries.
    ///
    /// # Errors
    /// [`SyncError::Configuration`] if any period in `config` is zero.
    pub fn new(config: SchedulerConfig) -> SyncResult<Self> {
        config.validate()?;
        let (mode, _) = watch::channel(SchedulerMode::Stopped);
        let (shutdown, _) = watch::channel(false);
        Ok(Self {
            config,
            entries: Mutex::new(BTreeMap::new()),
            mode,
            shutdown,
            firing: tokio::sync::Mutex::new(()),
        })
    }

    /// Timing configuration.
    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Install or replace the entry for `(target, command)`.
    ///
    /// Missing periods fall back to the configured defaults. Replacing an
    /// entry resets its schedule so it fires on the next tick.
    pub fn add_polling(
        &self,
        target: Arc<dyn PollTarget>,
        command: &str,
        qualifier: Option<Qualifier>,
        active: Option<Duration>,
        inactive: Option<Duration>,
    ) {
        let key = PollKey {
            target: target.target_id().to_string(),
            command: command.to_string(),
        };
        let entry = EntryState {
            target,
            qualifier: qualifier.unwrap_or_default(),
            active: active.unwrap_or(self.config.default_active),
            inactive: inactive.unwrap_or(self.config.default_inactive),
            last_fired: None,
        };
        tracing::debug!(
            target_id = %key.target,
            command = %key.command,
            active = ?entry.active,
            inactive = ?entry.inactive,
            "Polling entry installed"
        );
        self.entries.lock().insert(key, entry);
    }

    /// Change the qualifier or periods of an entry, keeping its schedule.
    ///
    /// Inserts the entry when absent. Returns `true` if it already existed.
    pub fn update_polling(
        &self,
        target: Arc<dyn PollTarget>,
        command: &str,
        qualifier: Option<Qualifier>,
        active: Option<Duration>,
        inactive: Option<Duration>,
    ) -> bool {
        let key = PollKey {
            target: target.target_id().to_string(),
            command: command.to_string(),
        };
        {
            let mut entries = self.entries.lock();
            if let Some(entry) = entries.get_mut(&key) {
                if let Some(qualifier) = qualifier {
                    entry.qualifier = qualifier;
                }
                if let Some(active) = active {
                    entry.active = active;
                }
                if let Some(inactive) = inactive {
                    entry.inactive = inactive;
                }
                entry.target = target;
                return true;
            }
        }
        self.add_polling(target, command, qualifier, active, inactive);
        false
    }

    /// Remove the entry for `(target_id, command)`. Absent entries are ignored.
    pub fn remove_polling(&self, target_id: &str, command: &str) -> bool {
        let key = PollKey {
            target: target_id.to_string(),
            command: command.to_string(),
        };
        let removed = self.entries.lock().remove(&key).is_some();
        if removed {
            tracing::debug!(target_id, command, "Polling entry removed");
        }
        removed
    }

    /// Remove every entry owned by `target_id`. Returns how many were removed.
    pub fn remove_target(&self, target_id: &str) -> usize {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|key, _| key.target != target_id);
        before - entries.len()
    }

    /// Snapshot of all entries in key order.
    pub fn entries(&self) -> Vec<PollingEntry> {
        self.entries
            .lock()
            .iter()
            .map(|(key, entry)| PollingEntry {
                target_id: key.target.clone(),
                command: key.command.clone(),
                qualifier: entry.qualifier.clone(),
                active: entry.active,
                inactive: entry.inactive,
            })
            .collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether there are no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    // -------------------------------------------------------------------------
    // Mode control
    // -------------------------------------------------------------------------

    /// Current run state.
    pub fn mode(&self) -> SchedulerMode {
        *self.mode.borrow()
    }

    /// Begin ticking in `mode`.
    pub fn start_polling(&self, mode: PollingMode) {
        tracing::info!(%mode, "Starting polling");
        self.set_polling_mode(mode);
    }

    /// Stop ticking. Polls already in flight complete.
    pub fn stop_polling(&self) {
        let previous = self.mode.send_replace(SchedulerMode::Stopped);
        if previous != SchedulerMode::Stopped {
            tracing::info!("Polling stopped");
        }
    }

    /// Switch cadence. Starts the scheduler if it was stopped.
    ///
    /// Setting the current mode again is a no-op.
    pub fn set_polling_mode(&self, mode: PollingMode) {
        let next = SchedulerMode::from(mode);
        let previous = self.mode.send_replace(next);
        if previous != next {
            tracing::info!(from = %previous, to = %next, "Polling mode changed");
        }
    }

    /// Parse `mode` and switch to it.
    pub fn set_polling_mode_str(&self, mode: &str) -> SyncResult<()> {
        self.set_polling_mode(mode.parse()?);
        Ok(())
    }

    /// Swap active and inactive. A stopped scheduler starts in active mode.
    pub fn toggle_polling_mode(&self) -> SchedulerMode {
        let next = match self.mode() {
            SchedulerMode::Active => PollingMode::Inactive,
            SchedulerMode::Inactive | SchedulerMode::Stopped => PollingMode::Active,
        };
        self.set_polling_mode(next);
        SchedulerMode::from(next)
    }

    // -------------------------------------------------------------------------
    // Firing
    // -------------------------------------------------------------------------

    /// Fire every entry due under the current mode. Returns how many fired.
    ///
    /// Does nothing while stopped.
    pub async fn tick(&self) -> usize {
        self.tick_at(Instant::now()).await
    }

    /// [`tick`](Self::tick) as of the scheduled instant `now`.
    ///
    /// An entry is due when its period has elapsed to within half a tick, so
    /// timer wake-up jitter never pushes it back a whole tick. Fired entries
    /// are stamped with `now`, not the wake-up time.
    pub async fn tick_at(&self, now: Instant) -> usize {
        let Some(mode) = self.mode().polling_mode() else {
            return 0;
        };
        let _firing = self.firing.lock().await;

        let slack = self.config.tick_for(mode) / 2;
        let due: Vec<DuePoll> = {
            let mut entries = self.entries.lock();
            entries
                .iter_mut()
                .filter(|(_, entry)| entry.is_due(mode, now, slack))
                .map(|(key, entry)| {
                    entry.last_fired = Some(now);
                    DuePoll {
                        target: Arc::clone(&entry.target),
                        command: key.command.clone(),
                        qualifier: entry.qualifier.clone(),
                    }
                })
                .collect()
        };

        tracing::trace!(%mode, due = due.len(), "Polling tick");
        Self::fire(due).await
    }

    /// Fire every entry once, regardless of mode or schedule.
    ///
    /// Used after startup to refresh all state.
    pub async fn poll_everything(&self) -> usize {
        let fired = self.refresh(|_| true).await;
        tracing::debug!(entries = fired, "Polled everything");
        fired
    }

    /// Fire every entry owned by `target_id` once, regardless of mode or
    /// schedule. Used when a device starts responding again.
    pub async fn poll_target(&self, target_id: &str) -> usize {
        let fired = self.refresh(|key| key.target == target_id).await;
        tracing::debug!(target_id, entries = fired, "Polled target");
        fired
    }

    async fn refresh(&self, selected: impl Fn(&PollKey) -> bool) -> usize {
        let _firing = self.firing.lock().await;
        let now = Instant::now();
        let all: Vec<DuePoll> = {
            let mut entries = self.entries.lock();
            entries
                .iter_mut()
                .filter(|(key, _)| selected(key))
                .map(|(key, entry)| {
                    entry.last_fired = Some(now);
                    DuePoll {
                        target: Arc::clone(&entry.target),
                        command: key.command.clone(),
                        qualifier: entry.qualifier.clone(),
                    }
                })
                .collect()
        };

        Self::fire(all).await
    }

    async fn fire(due: Vec<DuePoll>) -> usize {
        let fired = due.len();
        for poll in due {
            if let Err(err) = poll.target.poll(&poll.command, &poll.qualifier).await {
                tracing::warn!(
                    target_id = poll.target.target_id(),
                    command = %poll.command,
                    error = %err,
                    "Poll failed"
                );
            }
        }
        fired
    }

    // -------------------------------------------------------------------------
    // Driver
    // -------------------------------------------------------------------------

    /// Spawn the tick loop on the current runtime.
    ///
    /// The loop follows mode changes and exits on [`shutdown`](Self::shutdown).
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<()> {
        let scheduler = Arc::clone(self);
        tokio::spawn(async move { scheduler.run().await })
    }

    /// Ask the tick loop to exit.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    async fn run(&self) {
        let mut mode_rx = self.mode.subscribe();
        let mut shutdown_rx = self.shutdown.subscribe();
        tracing::debug!("Polling driver started");

        loop {
            if *shutdown_rx.borrow_and_update() {
                break;
            }
            let mode = *mode_rx.borrow_and_update();

            let Some(polling_mode) = mode.polling_mode() else {
                tokio::select! {
                    res = mode_rx.changed() => {
                        if res.is_err() {
                            break;
                        }
                    }
                    _ = shutdown_rx.changed() => {}
                }
                continue;
            };

            let mut interval = tokio::time::interval(self.config.tick_for(polling_mode));
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    deadline = interval.tick() => {
                        self.tick_at(deadline).await;
                    }
                    res = mode_rx.changed() => {
                        if res.is_err() {
                            return;
                        }
                        break;
                    }
                    _ = shutdown_rx.changed() => break,
                }
            }
        }

        tracing::debug!("Polling driver stopped");
    }
}

impl fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("mode", &self.mode())
            .field("entries", &self.len())
            .finish()
    }
}
