//! Error taxonomy (spec §7). Module-local errors convert into [`CoreError`]
//! at the seams, mirroring the teacher's `CoreError` umbrella in its
//! top-level crate module.

use thiserror::Error;

/// Malformed or mismatched reference (canonical string or binary form).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RefError {
    #[error("malformed reference string")]
    RefParse,
    #[error("wrong payload length for algo {algo}: got {len}")]
    RefLength { algo: &'static str, len: usize },
    #[error("unknown storage-ref tag byte: {0:#04x}")]
    UnknownTag(u8),
}

/// Codec-level failures: signature verification and format parsing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("signature verification failed")]
    SignatureInvalid,
    #[error("content hash mismatch")]
    ContentHashMismatch,
    #[error("content size mismatch: expected {expected}, got {got}")]
    ContentSizeMismatch { expected: u64, got: u64 },
    #[error("malformed wire bytes: {0}")]
    Malformed(String),
    #[error("wrong envelope format for this view")]
    WrongFormat,
    #[error("sequence must be >= 1")]
    BadSequence,
    #[error("previous must be none iff sequence == 1")]
    BadPrevious,
    #[error(transparent)]
    Ref(#[from] RefError),
}

/// Chain-invariant violations between two adjacent messages of one feed
/// (spec §4.3).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("first message of a feed must have sequence == 1")]
    FirstMessageSeq,
    #[error("message author does not match feed")]
    WrongAuthor,
    #[error("previous does not match the known head")]
    PreviousMismatch,
    #[error("sequence is not current + 1")]
    SequenceGap,
}

/// Errors surfaced by the storage abstractions the core consumes
/// (`RootLog`, `UserFeeds`) or their in-memory implementation.
#[derive(Debug, Error, Clone)]
pub enum StorageError {
    #[error("storage failure: {0}")]
    Failure(String),
    #[error("no entry at offset {0}")]
    NotFound(u64),
}

/// Scheduler and remote-stream control-flow errors (spec §4.7, §5).
#[derive(Debug, Error, Clone)]
pub enum SchedulerError {
    #[error("fetch timed out")]
    Timeout,
    #[error("cancelled")]
    Cancelled,
    #[error("remote stream closed")]
    StreamClosed,
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// Crate-boundary umbrella error. Every module's error type converts into
/// this via `From`, the same pattern as the teacher's `CoreError`.
#[derive(Debug, Error, Clone)]
pub enum CoreError {
    #[error(transparent)]
    Ref(#[from] RefError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}
