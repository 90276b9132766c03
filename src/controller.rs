//! Per-device controller: status cache, subscriptions, liveness and I/O.
//!
//! [`HardwareController`] is the object application code talks to for one
//! physical device. It combines:
//!
//! - a [`StatusStore`] with change detection,
//! - a [`SubscriptionRegistry`] of exact-path callbacks,
//! - a [`ConnectionLivenessTracker`] fed by poll outcomes,
//! - a [`CommandEndpoint`] that speaks the vendor protocol.
//!
//! # Concurrency
//!
//! The status store and liveness tracker share one lock so a status write and
//! the liveness side effect it triggers are atomic. Subscriptions have their
//! own lock. Neither is held while a callback runs, so callbacks may call back
//! into the controller. Endpoint traffic is serialized by a separate async
//! lock: at most one request is in flight per device.
//!
//! # Notification order
//!
//! When a poll answer restores a disconnected device, subscribers see
//! `ConnectionStatus = Connected` before the polled value. The device's
//! polling entries are then refreshed in the background.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;

use crate::command::{CommandDescriptor, CommandSet, CONNECTION_STATUS};
use crate::config::{DeviceSettings, PollingSpec};
use crate::endpoint::CommandEndpoint;
use crate::error::{SyncError, SyncResult};
use crate::liveness::{ConnectionLivenessTracker, ConnectionState, DEFAULT_MISS_THRESHOLD};
use crate::scheduler::{PollTarget, PollingScheduler};
use crate::status::{StatusEntry, StatusStore};
use crate::subscription::{StatusCallback, SubscriptionRegistry};
use crate::value::{Qualifier, Value};

// =============================================================================
// Builder
// =============================================================================

/// Builder for [`HardwareController`].
///
/// Defaults:
/// * miss threshold: 15
/// * response timeout: 1 second
/// * bidirectional
pub struct ControllerBuilder {
    id: String,
    name: Option<String>,
    endpoint: Arc<dyn CommandEndpoint>,
    commands: Vec<CommandDescriptor>,
    miss_threshold: u32,
    response_timeout: Duration,
    unidirectional: bool,
    polling: Vec<PollingSpec>,
}

impl ControllerBuilder {
    /// Set the display name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Declare a command.
    pub fn command(mut self, descriptor: CommandDescriptor) -> Self {
        self.commands.push(descriptor);
        self
    }

    /// Declare several commands.
    pub fn commands(mut self, descriptors: impl IntoIterator<Item = CommandDescriptor>) -> Self {
        self.commands.extend(descriptors);
        self
    }

    /// Consecutive unanswered polls tolerated before disconnecting.
    pub fn miss_threshold(mut self, threshold: u32) -> Self {
        self.miss_threshold = threshold;
        self
    }

    /// How long to wait for each endpoint call.
    pub fn response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Mark the device as send-only.
    pub fn unidirectional(mut self, unidirectional: bool) -> Self {
        self.unidirectional = unidirectional;
        self
    }

    /// Add a polling entry installed by [`HardwareController::register_polling`].
    pub fn poll(mut self, spec: PollingSpec) -> Self {
        self.polling.push(spec);
        self
    }

    /// Build the controller.
    pub fn build(self) -> Arc<HardwareController> {
        let commands = CommandSet::new(self.commands);
        let liveness = if self.unidirectional {
            ConnectionLivenessTracker::unidirectional()
        } else {
            ConnectionLivenessTracker::new(self.miss_threshold)
        };

        let mut status = StatusStore::new(self.id.clone(), commands.clone());
        // Seeded without dispatch; nobody can be subscribed yet.
        if let Err(err) = status.write(
            CONNECTION_STATUS,
            &Qualifier::new(),
            ConnectionState::Connected.as_value(),
        ) {
            tracing::error!(device = %self.id, error = %err, "Failed to seed connection status");
        }

        Arc::new(HardwareController {
            name: self.name.unwrap_or_else(|| self.id.clone()),
            subscriptions: Mutex::new(SubscriptionRegistry::new(self.id.clone(), commands.clone())),
            state: Mutex::new(DeviceState { status, liveness }),
            io: tokio::sync::Mutex::new(()),
            endpoint: self.endpoint,
            response_timeout: self.response_timeout,
            polling: self.polling,
            scheduler: Mutex::new(Weak::new()),
            commands,
            id: self.id,
        })
    }
}

// =============================================================================
// Controller
// =============================================================================

struct DeviceState {
    status: StatusStore,
    liveness: ConnectionLivenessTracker,
}

impl DeviceState {
    /// Publish a liveness transition into the store.
    fn publish(&mut self, connection: ConnectionState) -> Option<Notice> {
        match self
            .status
            .write(CONNECTION_STATUS, &Qualifier::new(), connection.as_value())
        {
            Ok(true) => Some(Notice::connection(connection)),
            Ok(false) => None,
            Err(err) => {
                tracing::error!(error = %err, "Failed to publish connection status");
                None
            }
        }
    }
}

/// A change to deliver once the state lock is released.
struct Notice {
    command: String,
    value: Value,
    qualifier: Qualifier,
}

impl Notice {
    fn connection(connection: ConnectionState) -> Self {
        Self {
            command: CONNECTION_STATUS.to_string(),
            value: connection.as_value(),
            qualifier: Qualifier::new(),
        }
    }
}

/// Status cache, subscriptions and liveness for one device.
pub struct HardwareController {
    id: String,
    name: String,
    commands: CommandSet,
    endpoint: Arc<dyn CommandEndpoint>,
    response_timeout: Duration,
    polling: Vec<PollingSpec>,
    /// Scheduler holding this device's entries, for refresh on reconnect
    scheduler: Mutex<Weak<PollingScheduler>>,
    state: Mutex<DeviceState>,
    subscriptions: Mutex<SubscriptionRegistry>,
    /// Serializes endpoint traffic
    io: tokio::sync::Mutex<()>,
}

impl HardwareController {
    /// Start building a controller for device `id`.
    pub fn builder(id: impl Into<String>, endpoint: Arc<dyn CommandEndpoint>) -> ControllerBuilder {
        ControllerBuilder {
            id: id.into(),
            name: None,
            endpoint,
            commands: Vec::new(),
            miss_threshold: DEFAULT_MISS_THRESHOLD,
            response_timeout: Duration::from_secs(1),
            unidirectional: false,
            polling: Vec::new(),
        }
    }

    /// Build a controller from configuration.
    pub fn from_settings(
        settings: &DeviceSettings,
        endpoint: Arc<dyn CommandEndpoint>,
    ) -> Arc<Self> {
        let mut builder = Self::builder(settings.id.clone(), endpoint)
            .name(settings.display_name())
            .commands(settings.commands.iter().cloned())
            .miss_threshold(settings.miss_threshold)
            .response_timeout(settings.response_timeout)
            .unidirectional(settings.unidirectional);
        for spec in &settings.polling {
            builder = builder.poll(spec.clone());
        }
        builder.build()
    }

    /// Device identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Display name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared commands, including `ConnectionStatus`.
    pub fn commands(&self) -> &CommandSet {
        &self.commands
    }

    /// Whether the device is send-only.
    pub fn is_unidirectional(&self) -> bool {
        self.state.lock().liveness.is_unidirectional()
    }

    /// Current inferred connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.state.lock().liveness.state()
    }

    /// Unanswered polls since the last answer or status change.
    pub fn consecutive_misses(&self) -> u32 {
        self.state.lock().liveness.consecutive_misses()
    }

    // -------------------------------------------------------------------------
    // Commands
    // -------------------------------------------------------------------------

    fn require(&self, command: &str) -> SyncResult<()> {
        if command == CONNECTION_STATUS || !self.commands.contains(command) {
            return Err(SyncError::UnsupportedCommand {
                device: self.id.clone(),
                command: command.to_string(),
            });
        }
        Ok(())
    }

    /// Send `value` for `command`.
    ///
    /// The status cache is not touched; the new value is observed on the next
    /// poll. Liveness is not affected.
    ///
    /// # Errors
    /// - [`SyncError::UnsupportedCommand`] for undeclared commands
    /// - [`SyncError::Timeout`] when the endpoint does not accept the command
    ///   within the response timeout
    /// - [`SyncError::Transport`] on codec or transport failure
    #[tracing::instrument(skip(self, value, qualifier), fields(device = %self.id))]
    pub async fn set(&self, command: &str, value: Value, qualifier: &Qualifier) -> SyncResult<()> {
        self.require(command)?;
        tracing::debug!(%value, %qualifier, "Sending command");

        let _io = self.io.lock().await;
        match tokio::time::timeout(
            self.response_timeout,
            self.endpoint.set(command, &value, qualifier),
        )
        .await
        {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(SyncError::transport(&self.id, command, &err)),
            Err(_) => Err(SyncError::Timeout {
                device: self.id.clone(),
                command: command.to_string(),
            }),
        }
    }

    /// Query the current value of `command` and feed the outcome into the
    /// status cache and liveness tracker.
    ///
    /// Returns `Ok(None)` when the device did not answer; that counts as a
    /// miss. Send-only devices are never queried and always return `Ok(None)`.
    ///
    /// # Errors
    /// - [`SyncError::UnsupportedCommand`] for undeclared commands
    /// - [`SyncError::Transport`] on codec or transport failure
    #[tracing::instrument(skip(self, qualifier), fields(device = %self.id))]
    pub async fn update(&self, command: &str, qualifier: &Qualifier) -> SyncResult<Option<Value>> {
        self.require(command)?;
        if self.is_unidirectional() {
            tracing::trace!("Skipping query on send-only device");
            return Ok(None);
        }

        let _io = self.io.lock().await;
        let outcome = tokio::time::timeout(
            self.response_timeout,
            self.endpoint.update(command, qualifier),
        )
        .await;

        match outcome {
            Ok(Ok(Some(value))) => {
                self.record_answer();
                self.write_status(command, qualifier, value.clone())?;
                Ok(Some(value))
            }
            Ok(Ok(None)) | Err(_) => {
                self.record_miss();
                Ok(None)
            }
            Ok(Err(err)) => Err(SyncError::transport(&self.id, command, &err)),
        }
    }

    fn record_answer(&self) {
        let notice = {
            let mut state = self.state.lock();
            match state.liveness.record_success() {
                Some(restored) => state.publish(restored),
                None => None,
            }
        };
        let restored = notice.is_some();
        if restored {
            tracing::info!(device = %self.id, "Device is responding again");
        }
        self.notify(notice);
        if restored {
            self.refresh_polling();
        }
    }

    fn record_miss(&self) {
        let (misses, notice) = {
            let mut state = self.state.lock();
            let notice = match state.liveness.record_timeout() {
                Some(lost) => state.publish(lost),
                None => None,
            };
            (state.liveness.consecutive_misses(), notice)
        };
        if notice.is_some() {
            tracing::warn!(device = %self.id, misses, "Device stopped responding");
        } else {
            tracing::debug!(device = %self.id, misses, "No response");
        }
        self.notify(notice);
    }

    // -------------------------------------------------------------------------
    // Status
    // -------------------------------------------------------------------------

    /// Record a status value and notify the matching subscriber if it changed.
    ///
    /// A changed value is evidence the device is alive: the miss counter is
    /// reset and a disconnected device is marked connected, with the
    /// `ConnectionStatus` notification delivered first.
    ///
    /// Returns whether the value changed. A qualifier missing a declared
    /// parameter is dropped and reported as unchanged.
    ///
    /// # Errors
    /// [`SyncError::UnknownCommand`] when `command` is not declared.
    pub fn write_status(&self, command: &str, qualifier: &Qualifier, value: Value) -> SyncResult<bool> {
        let mut notices = Vec::with_capacity(2);
        let restored = {
            let mut state = self.state.lock();
            if !state.status.write(command, qualifier, value.clone())? {
                return Ok(false);
            }
            if command != CONNECTION_STATUS {
                if let Some(restored) = state.liveness.record_success() {
                    notices.extend(state.publish(restored));
                    tracing::info!(device = %self.id, "Device is responding again");
                }
            }
            !notices.is_empty()
        };

        notices.push(Notice {
            command: command.to_string(),
            value,
            qualifier: qualifier.clone(),
        });
        self.notify(notices);
        if restored {
            self.refresh_polling();
        }
        Ok(true)
    }

    /// Last known value of `command` under `qualifier`.
    pub fn read_status(&self, command: &str, qualifier: &Qualifier) -> Option<Value> {
        self.state.lock().status.read(command, qualifier)
    }

    /// Every cached status value.
    pub fn status_snapshot(&self) -> Vec<StatusEntry> {
        self.state.lock().status.snapshot()
    }

    // -------------------------------------------------------------------------
    // Subscriptions
    // -------------------------------------------------------------------------

    /// Invoke `callback` whenever the value at `(command, qualifier)` changes.
    ///
    /// Replaces any existing callback at the same path. Returns `Ok(false)`
    /// when the qualifier lacks a declared parameter.
    ///
    /// # Errors
    /// [`SyncError::UnknownCommand`] when `command` is not declared.
    pub fn subscribe_status<F>(&self, command: &str, qualifier: &Qualifier, callback: F) -> SyncResult<bool>
    where
        F: Fn(&str, &Value, &Qualifier) + Send + Sync + 'static,
    {
        let callback: StatusCallback = Arc::new(callback);
        self.subscriptions.lock().subscribe(command, qualifier, callback)
    }

    /// Remove the callback at `(command, qualifier)`. Returns whether one existed.
    pub fn unsubscribe_status(&self, command: &str, qualifier: &Qualifier) -> bool {
        self.subscriptions.lock().unsubscribe(command, qualifier)
    }

    fn notify(&self, notices: impl IntoIterator<Item = Notice>) {
        for notice in notices {
            let callback = self
                .subscriptions
                .lock()
                .callback_for(&notice.command, &notice.qualifier);
            if let Some(callback) = callback {
                callback(&notice.command, &notice.value, &notice.qualifier);
            }
        }
    }

    // -------------------------------------------------------------------------
    // Polling
    // -------------------------------------------------------------------------

    /// Install this device's configured polling entries. Send-only devices
    /// install nothing. Returns how many entries were installed.
    ///
    /// The scheduler is remembered so every entry of this device is polled
    /// again as soon as it reconnects.
    pub fn register_polling(self: &Arc<Self>, scheduler: &Arc<PollingScheduler>) -> usize {
        if self.is_unidirectional() {
            return 0;
        }
        *self.scheduler.lock() = Arc::downgrade(scheduler);
        for spec in &self.polling {
            let target: Arc<dyn PollTarget> = self.clone();
            scheduler.add_polling(
                target,
                &spec.command,
                spec.qualifier.clone(),
                spec.active,
                spec.inactive,
            );
        }
        self.polling.len()
    }

    /// Remove all of this device's polling entries.
    pub fn unregister_polling(&self, scheduler: &PollingScheduler) -> usize {
        *self.scheduler.lock() = Weak::new();
        scheduler.remove_target(&self.id)
    }

    /// Poll every entry of this device once, off the caller's task.
    ///
    /// Skipped when no scheduler is registered or no runtime is running.
    fn refresh_polling(&self) {
        let Some(scheduler) = self.scheduler.lock().upgrade() else {
            return;
        };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let id = self.id.clone();
        runtime.spawn(async move {
            scheduler.poll_target(&id).await;
        });
    }
}

#[async_trait]
impl PollTarget for HardwareController {
    fn target_id(&self) -> &str {
        &self.id
    }

    async fn poll(&self, command: &str, qualifier: &Qualifier) -> SyncResult<()> {
        self.update(command, qualifier).await.map(|_| ())
    }
}

impl std::fmt::Debug for HardwareController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HardwareController")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("commands", &self.commands.len())
            .field("connection", &self.connection_state())
            .finish()
    }
}
