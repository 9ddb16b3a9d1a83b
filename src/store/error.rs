//! Store-signalled error shape, independent of any particular backend.

use thiserror::Error as ThisError;

///
/// StoreError
///
/// An error surfaced by a `Store` implementation. `code` carries the
/// backend's native error discriminant (e.g. DynamoDB's
/// `ConditionalCheckFailedException`) so the batcher and transaction layers
/// can decode it without depending on the backend crate; `retryable` is the
/// authoritative retry signal per `spec.md` §6.
///

#[derive(Clone, Debug, ThisError)]
#[error("store error [{code}]: {message}")]
pub struct StoreError {
    pub code: StoreErrorCode,
    pub message: String,
    pub retryable: bool,
    /// For a failed `transact_write`: one slot per submitted `WriteOp`,
    /// `true` if that operation is the one whose condition failed. `None`
    /// when the backend could not attribute the failure to a specific
    /// operation (e.g. a throttling error, or the single-item fast path).
    pub cancellation_reasons: Option<Vec<bool>>,
}

impl StoreError {
    #[must_use]
    pub fn new(code: StoreErrorCode, message: impl Into<String>) -> Self {
        let retryable = code.is_inherently_retryable();
        Self {
            code,
            message: message.into(),
            retryable,
            cancellation_reasons: None,
        }
    }

    #[must_use]
    pub fn with_cancellation_reasons(mut self, reasons: Vec<bool>) -> Self {
        self.cancellation_reasons = Some(reasons);
        self
    }

    #[must_use]
    pub const fn conditional_check_failed() -> StoreErrorCodeBuilder {
        StoreErrorCodeBuilder(StoreErrorCode::ConditionalCheckFailed)
    }
}

/// Helper so call sites read `StoreError::conditional_check_failed().with("...")`.
pub struct StoreErrorCodeBuilder(StoreErrorCode);

impl StoreErrorCodeBuilder {
    #[must_use]
    pub fn with(self, message: impl Into<String>) -> StoreError {
        StoreError::new(self.0, message)
    }
}

///
/// StoreErrorCode
///
/// The closed set of error codes this crate distinguishes. Any other
/// backend-native code is carried as `Other` with `retryable` decided by
/// the backend adapter (e.g. HTTP 5xx / throttling maps to `retryable =
/// true`).
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StoreErrorCode {
    ConditionalCheckFailed,
    TransactionCanceled,
    ProvisionedThroughputExceeded,
    Throttling,
    InternalServerError,
    ServiceUnavailable,
    ResourceNotFound,
    ValidationError,
    Other,
}

impl StoreErrorCode {
    /// Codes `spec.md` §6 names as unconditionally retryable:
    /// `{ConditionalCheckFailedException, TransactionCanceledException}`,
    /// plus the transient-server codes any backend can signal.
    #[must_use]
    pub const fn is_inherently_retryable(self) -> bool {
        matches!(
            self,
            Self::ConditionalCheckFailed
                | Self::TransactionCanceled
                | Self::ProvisionedThroughputExceeded
                | Self::Throttling
                | Self::InternalServerError
                | Self::ServiceUnavailable
        )
    }
}

impl std::fmt::Display for StoreErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::ConditionalCheckFailed => "ConditionalCheckFailedException",
            Self::TransactionCanceled => "TransactionCanceledException",
            Self::ProvisionedThroughputExceeded => "ProvisionedThroughputExceededException",
            Self::Throttling => "ThrottlingException",
            Self::InternalServerError => "InternalServerError",
            Self::ServiceUnavailable => "ServiceUnavailable",
            Self::ResourceNotFound => "ResourceNotFoundException",
            Self::ValidationError => "ValidationException",
            Self::Other => "Other",
        };
        write!(f, "{label}")
    }
}
