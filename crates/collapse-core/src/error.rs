//! Errors raised while encoding or decoding shard results.

use thiserror::Error;

/// Category of a codec failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecErrorKind {
    /// The buffer ended before a complete value was read.
    Truncated,
    /// A tag did not match the value expected at this position.
    TypeMismatch,
    /// The buffer was written with a different format version.
    VersionMismatch,
    /// A value has no wire representation (custom sort values).
    UnsupportedType,
    /// Structurally invalid content (bad UTF-8, trailing bytes, overflowing varint).
    Malformed,
}

impl std::fmt::Display for CodecErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecErrorKind::Truncated => write!(f, "truncated"),
            CodecErrorKind::TypeMismatch => write!(f, "type mismatch"),
            CodecErrorKind::VersionMismatch => write!(f, "version mismatch"),
            CodecErrorKind::UnsupportedType => write!(f, "unsupported type"),
            CodecErrorKind::Malformed => write!(f, "malformed"),
        }
    }
}

/// Failure to encode or decode a single buffer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("codec error ({kind}): {detail}")]
pub struct CodecError {
    pub kind: CodecErrorKind,
    pub detail: String,
}

impl CodecError {
    pub fn new(kind: CodecErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    pub fn truncated(detail: impl Into<String>) -> Self {
        Self::new(CodecErrorKind::Truncated, detail)
    }

    pub fn type_mismatch(detail: impl Into<String>) -> Self {
        Self::new(CodecErrorKind::TypeMismatch, detail)
    }

    pub fn version_mismatch(found: u8, expected: u8) -> Self {
        Self::new(
            CodecErrorKind::VersionMismatch,
            format!("found format version {}, expected {}", found, expected),
        )
    }

    pub fn unsupported(detail: impl Into<String>) -> Self {
        Self::new(CodecErrorKind::UnsupportedType, detail)
    }

    pub fn malformed(detail: impl Into<String>) -> Self {
        Self::new(CodecErrorKind::Malformed, detail)
    }
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind_and_detail() {
        let err = CodecError::version_mismatch(9, 1);
        assert_eq!(err.kind, CodecErrorKind::VersionMismatch);
        let text = err.to_string();
        assert!(text.contains("version mismatch"));
        assert!(text.contains("found format version 9"));
    }
}
