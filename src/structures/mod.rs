pub mod config;
pub mod error;
pub mod metrics;
pub mod state;
pub mod stats;

pub use config::{Endpoint, LinkConfig};
pub use error::{LinkError, TResult};
pub use metrics::LinkMetrics;
pub use state::{DisconnectReason, LinkState};
pub use stats::LinkStats;
