//! # hwsync
//!
//! Device state synchronization and adaptive polling for remote AV and
//! control hardware: displays, DSPs, matrix switchers and anything else that
//! answers status queries over a serial or TCP link.
//!
//! The runtime keeps a last-known value for every (command, qualifier) pair of
//! every device, notifies subscribers only when a value actually changes, and
//! infers whether a device is connected from whether it keeps answering polls.
//! A single scheduler polls all devices on two cadences, a fast one while the
//! system is in use and a slow one while idle.
//!
//! ## Crate Structure
//!
//! - **`value`**: `Value` and `Qualifier`, the data flowing through every layer.
//! - **`command`**: command descriptors, the per-device `CommandSet` and
//!   qualifier resolution into flattened `StatusKey`s.
//! - **`status`**: the change-detecting `StatusStore`.
//! - **`subscription`**: exact-path status callbacks.
//! - **`liveness`**: the miss-counting `ConnectionLivenessTracker`.
//! - **`endpoint`**: the `CommandEndpoint` capability a vendor driver implements.
//! - **`codec`** / **`transport`**: a table-driven endpoint over framed byte streams.
//! - **`controller`**: `HardwareController`, which ties the above together for one device.
//! - **`scheduler`**: the process-wide `PollingScheduler`.
//! - **`registry`**: `DeviceRegistry`, devices plus their scheduler.
//! - **`config`** / **`logging`**: Figment configuration and tracing setup.
//! - **`mock`**: a scriptable in-memory endpoint for tests and simulation.

pub mod codec;
pub mod command;
pub mod config;
pub mod controller;
pub mod endpoint;
pub mod error;
pub mod liveness;
pub mod logging;
pub mod mock;
pub mod registry;
pub mod scheduler;
pub mod status;
pub mod subscription;
pub mod transport;
pub mod value;

pub use command::{CommandDescriptor, CommandSet, CONNECTION_STATUS};
pub use controller::HardwareController;
pub use endpoint::CommandEndpoint;
pub use error::{SyncError, SyncResult};
pub use liveness::ConnectionState;
pub use registry::DeviceRegistry;
pub use scheduler::{PollingMode, PollingScheduler, SchedulerMode};
pub use value::{Qualifier, Value};
