//! Pinger - watches a set of HTTP endpoints and tracks their last status
//!
//! Each target gets its own recurring probe task. Status transitions are
//! broadcast to listeners and the target list is persisted to a local
//! libsql database.

pub mod config;
pub mod console;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod orchestrator;
pub mod pool;
pub mod validation;

pub use config::Config;
pub use error::{MonitorError, MonitorResult};
pub use orchestrator::Orchestrator;
