//! # Utility Modules
//!
//! Supporting utilities for logging, metrics, and timing.
//!
//! ## Components
//! - **Logging**: Structured logging setup from configuration
//! - **Metrics**: Thread-safe observability counters
//! - **Timeout**: Bounded reads and retry budgets

pub mod logging;
pub mod metrics;
pub mod timeout;

pub use metrics::{global_metrics, Metrics, MetricsSnapshot};
pub use timeout::{ReadOutcome, RetryBudget};
