//! Error types for the statistics engine

use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

/// Main error type for the engine
///
/// Only `RegionNotFound` means "no such region". A region that resolves but
/// has no loss rows is a successful result with `value == 0`, never an error.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Unknown iso / admin id / geostore hash / use kind / protected-area id
    #[error("{0}")]
    RegionNotFound(String),

    /// Missing or malformed request parameter
    #[error("{0}")]
    InvalidInput(String),

    /// Posted GeoJSON without a usable geometry
    #[error("Invalid geometry: {0}")]
    InvalidGeometry(String),

    /// Analytical store failure (transport, status, body)
    #[error("Store error: {0}")]
    Store(String),

    /// Boundary service failure other than not-found
    #[error("Boundary service error: {0}")]
    Boundary(String),

    /// Query template rendering failed
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),
}

impl EngineError {
    /// Whether the caller should see a 4xx (the request itself is at fault)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            EngineError::RegionNotFound(_)
                | EngineError::InvalidInput(_)
                | EngineError::InvalidGeometry(_)
        )
    }
}
