//! Audit Extension Controller Library
//!
//! Provisions a managed audit-logging pipeline for shoot clusters: an audit
//! webhook backend on the seed, an audittailer inside the shoot, and optional
//! forwarding of audit records from one to the other over mutual TLS.
//!
//! The [`controller::Actuator`] is the entry point. It decodes the
//! `AuditConfig`, materializes the audittailer certificate chain, composes the
//! seed and shoot resource sets and hands them to a
//! [`installer::ResourceInstaller`]. Tests are included in the module files.

pub mod config;
pub mod constants;
pub mod controller;
pub mod crd;
pub mod error;
pub mod fluentbit;
pub mod images;
pub mod installer;
pub mod observability;
pub mod resources;
pub mod secrets;
pub mod server;

pub use error::{ActuatorError, ErrorKind};
