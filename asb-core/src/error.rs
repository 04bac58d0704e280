use thiserror::Error;

/// Every failure the toolchain can report.
///
/// Decode errors carry a byte offset (absolute within the container, or an
/// absolute code address while disassembling), assembly errors carry the
/// 1-based source line.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AsbError {
    #[error("decode error at 0x{position:X}: {reason}")]
    Decode { position: usize, reason: String },

    #[error("syntax error at line {line}: {reason}")]
    Syntax { line: usize, reason: String },

    #[error("semantic error at line {line}: {reason}")]
    Semantic { line: usize, reason: String },

    #[error("encode error: {reason}")]
    Encode { reason: String },

    #[error("failed to format text: {0}")]
    Format(#[from] std::fmt::Error),
}

impl AsbError {
    pub fn decode(position: usize, reason: impl Into<String>) -> Self {
        Self::Decode {
            position,
            reason: reason.into(),
        }
    }

    pub fn syntax(line: usize, reason: impl Into<String>) -> Self {
        Self::Syntax {
            line,
            reason: reason.into(),
        }
    }

    pub fn semantic(line: usize, reason: impl Into<String>) -> Self {
        Self::Semantic {
            line,
            reason: reason.into(),
        }
    }

    pub fn encode(reason: impl Into<String>) -> Self {
        Self::Encode {
            reason: reason.into(),
        }
    }

    /// Source line of an assembly error.
    pub fn line(&self) -> Option<usize> {
        match self {
            Self::Syntax { line, .. } | Self::Semantic { line, .. } => Some(*line),
            _ => None,
        }
    }

    /// Byte offset of a decode error.
    pub fn position(&self) -> Option<usize> {
        match self {
            Self::Decode { position, .. } => Some(*position),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, AsbError>;
