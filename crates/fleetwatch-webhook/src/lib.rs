//! Signed webhook dispatch: subscriber resolution, HMAC signing,
//! outcome classification, retry scheduling, and the per-subscriber
//! threshold gate (spec.md §4.G, §4.H).

pub mod dispatcher;
pub mod retry_scan;
pub mod signing;
pub mod threshold_gate;

pub use dispatcher::WebhookDispatcher;
pub use threshold_gate::{ClearOutcome, GateOutcome, ThresholdGate};
