//! Target monitoring engine
//!
//! This module is responsible for:
//! - Holding the monitored targets and their last observed status
//! - Probing targets over HTTP
//! - Running one recurring probe task per target
//! - Broadcasting status transitions
pub mod notifier;
pub mod prober;
pub mod scheduler;
pub mod store;
pub mod types;

pub use notifier::ChangeNotifier;
pub use prober::{HttpProber, ProbeError, ProbeMethod, Prober};
pub use scheduler::{Scheduler, TaskHandle};
pub use store::TargetStore;
pub use types::{NOT_PROBED, StatusChange, StatusClass, Target};
