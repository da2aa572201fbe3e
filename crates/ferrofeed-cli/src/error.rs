use ferrofeed_core::{FetchError, FetchErrorKind, StoreError, ValidationError};
use thiserror::Error;

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("[{}] {}", .0.code(), .0)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Warehouse(#[from] ferrofeed_warehouse::WarehouseError),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Validation(_) => 2,
            Self::Fetch(error) => fetch_exit_code(error),
            Self::Store(StoreError::InvalidRange { .. }) => 2,
            Self::Store(_) | Self::Warehouse(_) => 5,
            Self::Serialization(_) | Self::Io(_) => 1,
        }
    }
}

pub fn fetch_exit_code(error: &FetchError) -> u8 {
    if error.is_client_error() {
        return 2;
    }
    match error.kind() {
        FetchErrorKind::InvalidRequest => 2,
        FetchErrorKind::RateLimited => 3,
        FetchErrorKind::SchemaMismatch
        | FetchErrorKind::TransientUpstream
        | FetchErrorKind::PermanentUpstream
        | FetchErrorKind::UpstreamUnavailable
        | FetchErrorKind::FetchAborted => 4,
        FetchErrorKind::Persistence => 5,
        FetchErrorKind::LeaseTimeout => 6,
    }
}
