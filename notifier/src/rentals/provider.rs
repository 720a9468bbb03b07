//! Telephony provider seam.

use async_trait::async_trait;
use thiserror::Error;
use tracing::info;

use crate::models::Rental;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("provider request failed: {0}")]
    Transport(String),
}

/// Operations the sweep needs from the telephony provider.
#[async_trait]
pub trait NumberProvider: Send + Sync {
    /// Return a rented number to the provider's pool.
    async fn release_number(&self, rental: &Rental) -> Result<(), ProviderError>;
}

/// Provider that records release requests in the log and performs no call.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingProvider;

#[async_trait]
impl NumberProvider for LoggingProvider {
    async fn release_number(&self, rental: &Rental) -> Result<(), ProviderError> {
        info!(
            rental_id = %rental.id,
            phone_number = %rental.phone_number,
            provider_ref = ?rental.provider_ref,
            "provider_release_requested"
        );
        Ok(())
    }
}
