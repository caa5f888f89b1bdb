use async_trait::async_trait;
use shared::protocol::{ConnectResponse, PairingCodeResponse, PartnerStatusResponse};

pub mod config;
pub mod coordinator;
pub mod error;
pub mod token_store;
pub mod transport;
pub mod types;

pub use coordinator::{PairingCoordinator, PairingOptions};
pub use error::{BackendError, PairingError};
pub use token_store::{FileTokenStore, MemoryTokenStore};
pub use transport::HttpPairingBackend;
pub use types::{PairingEvent, PairingPhase, PairingState};

/// Source of the bearer token for the signed-in user. `None` means signed out.
#[async_trait]
pub trait TokenStore: Send + Sync {
    async fn token(&self) -> Option<String>;
}

#[async_trait]
pub trait PairingBackend: Send + Sync {
    async fn partner_status(&self) -> Result<PartnerStatusResponse, BackendError>;
    async fn generate_pairing_code(&self) -> Result<PairingCodeResponse, BackendError>;
    async fn connect_with_code(&self, code: &str) -> Result<ConnectResponse, BackendError>;
    async fn unmatch(&self) -> Result<(), BackendError>;
}
