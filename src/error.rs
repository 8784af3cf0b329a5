//! Error types shared by the selector, engines and API client.

/// Errors that abort an invocation.
///
/// Per-item failures during batch work are not represented here; they are
/// folded into [`crate::model::ItemReport`] values instead.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    /// No runs matched the requested ids, names or filters.
    #[error("run selection failed: {message}")]
    Selection { message: String },

    /// Fewer runs than a merge needs.
    #[error("merge needs at least 2 runs, got {found}")]
    TooFewRuns { found: usize },

    /// The overlap metric is absent from a run's history.
    #[error("metric '{metric}' not found in history of run {run_name} ({run_id})")]
    MissingMetric {
        metric: String,
        run_id: String,
        run_name: String,
    },

    /// Overlap-metric ranges of adjacent runs overlap.
    #[error("overlap verification failed for metric '{metric}':\n  {}", .violations.join("\n  "))]
    OverlapVerification {
        metric: String,
        violations: Vec<String>,
    },

    /// Bad or missing configuration.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// The tracking service answered with an application-level error.
    #[error("tracking API error: {message}")]
    Api { message: String },

    /// Transport failure talking to the tracking service.
    #[error("network error: {0}")]
    Http(#[from] reqwest::Error),

    /// The tracking service answered with something we could not decode.
    #[error("invalid response: {message}")]
    InvalidResponse { message: String },

    /// Local filesystem failure.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl ToolError {
    pub fn selection(message: impl Into<String>) -> Self {
        Self::Selection {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.display().to_string(),
            source,
        }
    }

    /// Exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Selection { .. } | Self::TooFewRuns { .. } | Self::Config { .. } => 1,
            Self::MissingMetric { .. } | Self::OverlapVerification { .. } => 2,
            Self::Api { .. } | Self::Http(_) | Self::InvalidResponse { .. } => 3,
            Self::Io { .. } => 4,
        }
    }
}

pub type ToolResult<T> = Result<T, ToolError>;
