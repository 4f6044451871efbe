use crate::storage::StorageError;

/// Errors surfaced to callers of the filter lifecycle. Validation and quota
/// failures are terminal for the request; they are never retried internally.
#[derive(Debug, thiserror::Error)]
pub enum FilterError {
    #[error("filter name is not set")]
    NameNotSet,
    #[error("filter not changed")]
    NotChanged,
    #[error("min price more than max price")]
    MinPriceAboveMax,
    #[error("min rooms more than max rooms")]
    MinRoomsAboveMax,
    #[error("min area more than max area")]
    MinAreaAboveMax,
    #[error("filter limit exceeded")]
    LimitExceeded,
    #[error("filter not found")]
    NotFound,
    #[error("active filter not found")]
    DraftNotFound,
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl FilterError {
    /// True for errors the caller caused (validation and quota), as opposed
    /// to infrastructure failures.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, FilterError::Storage(_))
    }
}
