//! # Controller
//!
//! Core controller modules for the audit extension.
//!
//! - `actuator`: Reconcile, Delete, Restore and Migrate for one shoot
//! - `backoff`: Fibonacci backoff mechanism for retries
//! - `composition`: Backend-dependent fluent-bit fragments and seed objects
//! - `runtime`: Finalizer handling, status updates and error policy
//! - `wait`: Bounded wait for managed resources to disappear

pub mod actuator;
pub mod backoff;
pub mod composition;
pub mod runtime;
pub mod wait;

pub use actuator::{Actuator, DesiredState};
pub use wait::{wait_until_removed, WaitError, WaitOptions};
