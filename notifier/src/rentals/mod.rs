//! Phone number rental lifecycle jobs.

pub mod provider;
pub mod sweep;

pub use provider::{LoggingProvider, NumberProvider, ProviderError};
pub use sweep::{SweepReport, Sweeper};
