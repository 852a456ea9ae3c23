// Scheduler module for resuming durably suspended notification runs

pub mod engine;

pub use engine::{WakeupEngine, WakeupEngineConfig, WakeupScheduler};
