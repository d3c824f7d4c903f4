// crates/mediaconv-core/src/error.rs
//
// Structured errors observable at the public API (§6/§7). Internal glue that
// never crosses a track-pipeline or orchestrator boundary keeps using
// `anyhow::Result`, matching the teacher's own split between typed UI-facing
// errors and `anyhow`-wrapped decode/probe failures.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConversionError {
    /// A configuration value was rejected synchronously at construction or
    /// planning time. `path` names the offending option, e.g.
    /// `"video.bitrate"` or `"trim.end"`.
    #[error("invalid option at `{path}`: {message}")]
    InvalidOption { path: String, message: String },

    /// Planning completed but `is_valid` is false — too few tracks survived,
    /// or the output format's minimum track-count requirements are unmet.
    #[error("conversion is not valid: {reason}")]
    ConversionNotValid { reason: String },

    /// `execute()` was called on a conversion that already executed.
    #[error("conversion has already executed")]
    ConversionAlreadyExecuted,

    /// `execute()` observed (or `cancel()` triggered) cancellation. Takes
    /// precedence over any runtime error once `canceled` is set (§7).
    #[error("conversion was canceled")]
    ConversionCanceled,

    /// A decoder/encoder/demuxer/muxer backend call failed at runtime for
    /// reasons other than filesystem access (codec negotiation, malformed
    /// input, …).
    #[error("backend error: {0}")]
    Backend(#[from] anyhow::Error),

    /// A filesystem-adjacent failure a backend surfaced while opening,
    /// writing, or finalizing a file (not found, permission denied, disk
    /// full). Kept distinct from `Backend` so callers can tell "the media
    /// itself is fine, the filesystem isn't" apart from codec/format errors.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Classifies a backend failure: filesystem errors become [`ConversionError::Io`],
    /// everything else becomes [`ConversionError::Backend`]. Backends return
    /// plain `anyhow::Result`, so this is where the public API recovers the
    /// distinction.
    pub fn from_backend(err: anyhow::Error) -> ConversionError {
        match err.downcast::<std::io::Error>() {
            Ok(io_err) => ConversionError::Io(io_err),
            Err(err) => ConversionError::Backend(err),
        }
    }
}
