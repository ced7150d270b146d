//! Shared types, error handling, configuration, and ambient utilities
//! for FleetWatch.

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod metrics;
pub mod observability;
pub mod retry;
pub mod ring;
pub mod types;

pub use clock::{Clock, SystemClock, TestClock};
pub use config::FleetWatchConfig;
pub use dispatch::{EventDispatch, NullDispatch};
pub use error::{Error, Result};
pub use ring::Ring;
