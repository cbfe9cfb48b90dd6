pub mod community;
pub mod config;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod notify;
pub mod persist;
pub mod rating;
pub mod roster;
pub mod sweeper;
pub mod values;

pub use config::EngineConfig;
pub use engine::{Engine, MAX_BIO_CHARS};
pub use error::{LadderError, Result};
pub use notify::Notifier;
pub use persist::{SaveScheduler, SaveScope};
pub use sweeper::{NotifyingJanitor, ResourceJanitor, SweepReport, Sweeper};
