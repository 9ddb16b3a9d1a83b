//! Crate-wide error taxonomy.
//!
//! Mirrors the teacher's `InternalError` split of a stable `ErrorClass` /
//! `ErrorOrigin` pair plus a human message, generalized to the kinds
//! `spec.md` §7 enumerates (Configuration, Validation, Usage, Concurrency,
//! Transport, Programming).

use crate::store::StoreError;
use std::fmt;
use thiserror::Error as ThisError;

///
/// ErrorClass
///
/// Coarse classification used for logging/metrics grouping. Not itself the
/// retry signal — see [`Error::is_retryable`].
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorClass {
    Configuration,
    Validation,
    Usage,
    Concurrency,
    Transport,
    Programming,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Usage => "usage",
            Self::Concurrency => "concurrency",
            Self::Transport => "transport",
            Self::Programming => "programming",
        };
        write!(f, "{label}")
    }
}

///
/// ErrorOrigin
///
/// Which layer raised the error; orthogonal to `ErrorClass`.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ErrorOrigin {
    Field,
    Key,
    Item,
    Batcher,
    Query,
    Transaction,
    Store,
    Schema,
    Index,
}

impl fmt::Display for ErrorOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Field => "field",
            Self::Key => "key",
            Self::Item => "item",
            Self::Batcher => "batcher",
            Self::Query => "query",
            Self::Transaction => "transaction",
            Self::Store => "store",
            Self::Schema => "schema",
            Self::Index => "index",
        };
        write!(f, "{label}")
    }
}

///
/// Error
///
/// The single error type returned from every public operation. Each variant
/// names the `spec.md` §7 failure it corresponds to; `class`/`origin` are
/// derived per-variant via [`Error::class`] / [`Error::origin`] rather than
/// stored redundantly on every variant.
///

#[derive(Debug, ThisError)]
pub enum Error {
    // ---- Configuration ------------------------------------------------
    #[error("invalid transaction option: {0}")]
    InvalidOption(String),
    #[error("invalid field option on `{field}`: {reason}")]
    InvalidFieldOption { field: &'static str, reason: String },
    #[error("reserved or shadowed field name: `{0}`")]
    ReservedName(String),
    #[error("malformed index definition `{index}`: {reason}")]
    MalformedIndex { index: &'static str, reason: String },

    // ---- Validation -----------------------------------------------------
    #[error("validation failed on `{field}`: {message}")]
    Validation { field: String, message: String },
    #[error("bad key encoding: expected {expected} component(s), found {found}")]
    BadKeyEncoding { expected: usize, found: usize },
    #[error("key component `{field}` contains the reserved separator byte")]
    KeySeparatorInValue { field: &'static str },

    // ---- Usage -----------------------------------------------------------
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("cannot mutate key field `{0}`")]
    ImmutableKey(&'static str),
    #[error("cannot mutate immutable field `{0}` once initialized")]
    ImmutableField(&'static str),
    #[error("field `{0}` was omitted by the active index projection")]
    ProjectionOmitted(&'static str),
    #[error("duplicate filter on field `{0}`")]
    DuplicateFilter(&'static str),
    #[error("iterator is locked; no further filters may be added")]
    Locked,
    #[error("strong consistency is not available on secondary index `{0}`")]
    InconsistentReadRequiredOnIndex(&'static str),
    #[error("transaction was made read-only; no further writes are permitted")]
    ReadOnlyTransaction,

    // ---- Concurrency ------------------------------------------------------
    /// A CREATE-sourced item's non-existence guard failed: the row already
    /// existed. Deterministic for the given closure inputs, so this is not
    /// retried by `Transaction::run` — re-running the exact same create
    /// would fail identically.
    #[error("a model with this key already exists")]
    ModelAlreadyExists,
    /// A blind `update()`'s caller-supplied expected values no longer match
    /// the stored row. Deterministic for the given expected values, so this
    /// is not retried.
    #[error("blind update no longer matches the expected row state")]
    InvalidModelUpdate,
    /// A tracked item's read-derived condition failed at commit because a
    /// concurrent writer changed the row between this transaction's read
    /// and its commit. Retryable: re-running the closure observes the new
    /// state and may succeed (`spec.md` §8 "Race on counter").
    #[error("row was concurrently modified since it was read")]
    Contention,
    #[error("transaction failed after exhausting retries: {0}")]
    TransactionFailed(String),
    #[error("{0} non-retryable errors occurred in one transactional commit")]
    MultipleNonRetryableErrors(String),

    // ---- Transport ------------------------------------------------------
    #[error(transparent)]
    Store(#[from] StoreError),

    // ---- Programming ------------------------------------------------------
    #[error("row already tracked in this transaction: {0}")]
    DuplicateTracking(String),
    #[error("attempted to commit an untracked model")]
    UntrackedModel,
    #[error("attempted to write a model with no mutations")]
    UnchangedModel,
    #[error("model was invalidated by a write earlier in this transaction")]
    StaleCachedModel,
}

impl Error {
    /// Coarse classification, mirroring the teacher's `ErrorClass`.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidOption(_)
            | Self::InvalidFieldOption { .. }
            | Self::ReservedName(_)
            | Self::MalformedIndex { .. } => ErrorClass::Configuration,

            Self::Validation { .. }
            | Self::BadKeyEncoding { .. }
            | Self::KeySeparatorInValue { .. } => ErrorClass::Validation,

            Self::InvalidParameter(_)
            | Self::ImmutableKey(_)
            | Self::ImmutableField(_)
            | Self::ProjectionOmitted(_)
            | Self::DuplicateFilter(_)
            | Self::Locked
            | Self::InconsistentReadRequiredOnIndex(_)
            | Self::ReadOnlyTransaction => ErrorClass::Usage,

            Self::ModelAlreadyExists
            | Self::InvalidModelUpdate
            | Self::Contention
            | Self::TransactionFailed(_)
            | Self::MultipleNonRetryableErrors(_) => ErrorClass::Concurrency,

            Self::Store(_) => ErrorClass::Transport,

            Self::DuplicateTracking(_)
            | Self::UntrackedModel
            | Self::UnchangedModel
            | Self::StaleCachedModel => ErrorClass::Programming,
        }
    }

    /// Whether a fresh attempt of the same transaction closure might
    /// succeed. Drives both the batcher's single-item fast path and
    /// `Transaction::run`'s retry loop.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Contention => true,
            Self::Store(store_err) => store_err.retryable,
            _ => false,
        }
    }

    #[must_use]
    pub fn display_with_class(&self) -> String {
        format!("{}: {self}", self.class())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
