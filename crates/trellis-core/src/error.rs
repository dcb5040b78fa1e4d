//! Error types for the instance model.

/// Errors raised by the instance tree and addressing types.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("invalid path '{raw}': {reason}")]
    InvalidPath { raw: String, reason: String },

    #[error("invalid reference '{raw}': {reason}")]
    InvalidReference { raw: String, reason: String },

    #[error("no node at {node}")]
    NodeNotFound { node: String },

    #[error("no instance {ordinal} of {path}")]
    OrdinalNotFound { path: String, ordinal: usize },

    #[error("no repeat series {series}")]
    SeriesNotFound { series: String },

    #[error("document error: {0}")]
    Document(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ModelError>;

impl ModelError {
    pub fn invalid_path(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidPath {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn invalid_reference(raw: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidReference {
            raw: raw.into(),
            reason: reason.into(),
        }
    }

    pub fn node_not_found(node: impl ToString) -> Self {
        Self::NodeNotFound {
            node: node.to_string(),
        }
    }

    pub fn ordinal_not_found(path: impl ToString, ordinal: usize) -> Self {
        Self::OrdinalNotFound {
            path: path.to_string(),
            ordinal,
        }
    }

    pub fn series_not_found(series: impl ToString) -> Self {
        Self::SeriesNotFound {
            series: series.to_string(),
        }
    }

    /// Returns `true` if the error means the addressed node/series does not
    /// exist. Mutations hitting such targets are treated as no-ops upstream.
    pub fn is_missing_target(&self) -> bool {
        matches!(
            self,
            Self::NodeNotFound { .. } | Self::OrdinalNotFound { .. } | Self::SeriesNotFound { .. }
        )
    }
}
