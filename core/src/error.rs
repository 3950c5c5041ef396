use thiserror::Error;

/// The four error kinds a caller of any store or the `Service` facade can
/// observe. `Integrity` violations are deliberately not represented here:
/// per the write-path contract they surface as a sentinel return value,
/// not as an `Err`.
#[derive(Debug, Error)]
pub enum KiokuError {
    /// A backend call failed in a way that may succeed on retry (network
    /// blip, lock contention, embedder timeout). Logged, not surfaced to
    /// the caller of `Service::save`.
    #[error("transient backend error: {0}")]
    Transient(String),

    /// Caller-supplied input failed validation. Always surfaced.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A backend call failed for a structural reason (corrupt record,
    /// schema mismatch, disk full) unlikely to succeed on retry.
    #[error("backend error: {0}")]
    Backend(String),

    /// The durable append to the markdown log failed. Unlike every other
    /// write-path step this one is never swallowed: the log is the
    /// recovery anchor, so a write that can't reach it must fail loudly.
    #[error("markdown log append failed: {0}")]
    MarkdownAppend(String),
}

pub type KiokuResult<T> = Result<T, KiokuError>;
