//! Job assignment and lifecycle coordination.
//!
//! Jobs are created by customers, broadcast to eligible workers, claimed by
//! exactly one of them through a first-accept-wins race, and then driven
//! through `assigned → in-progress → ended` (or `cancelled`). Terminal jobs can
//! be reopened into a fresh acceptance epoch.
//!
//! [`Dispatcher`] is the entry point; storage and delivery are pluggable through
//! the [`JobStore`], [`DistanceStore`] and [`Notifier`] traits.

pub mod acceptance;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod policy;
pub mod state_machine;
pub mod store;
pub mod telemetry;

pub use config::DispatchConfig;
pub use error::{ConfigError, DispatchError, Result};
pub use notify::{Channel, DeliveryReport, Dispatched, LogNotifier, Notifier};
pub use orchestrator::Dispatcher;
pub use policy::{AccessPolicy, Actor, Role};
pub use state_machine::{Job, JobId, JobSpec, JobStatus, UserId};
pub use store::{DistanceStore, InMemoryDistanceStore, InMemoryJobStore, JobFilter, JobStore};
pub use telemetry::{OverrideFields, parse_clock_duration};
