use thiserror::Error;

/// Outcome code of a single solve attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SolveStatus {
    Converged,
    DivergedMaxIters,
    DivergedCapacityOverflow,
    DivergedSingularMatrix,
}

impl SolveStatus {
    pub fn success(&self) -> bool {
        *self == SolveStatus::Converged
    }
}

impl Default for SolveStatus {
    fn default() -> Self {
        SolveStatus::DivergedMaxIters
    }
}

#[derive(Debug, Error)]
pub enum SolveError {
    /// Invalid case data, detected while building the system.
    #[error("configuration error at {device}: {reason}")]
    Config { device: String, reason: String },

    /// A device wrote more triplets than were reserved for it.
    #[error("triplet capacity {capacity} exceeded while stamping {device}")]
    CapacityOverflow { device: String, capacity: usize },

    #[error("singular matrix at iteration {iteration}")]
    SingularMatrix { iteration: usize },

    #[error("reduced system is not square ({rows}x{cols})")]
    NonSquare { rows: usize, cols: usize },

    #[error("diverged after {iterations} iterations (error {error:e})")]
    Diverged { iterations: usize, error: f64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("sparse matrix error: {0}")]
    Sparse(String),
}

impl SolveError {
    pub(crate) fn config(device: impl Into<String>, reason: impl Into<String>) -> Self {
        SolveError::Config {
            device: device.into(),
            reason: reason.into(),
        }
    }

    /// Status code reported for this failure when it ends a solve.
    pub fn status(&self) -> SolveStatus {
        match self {
            SolveError::CapacityOverflow { .. } => SolveStatus::DivergedCapacityOverflow,
            SolveError::SingularMatrix { .. }
            | SolveError::NonSquare { .. }
            | SolveError::Sparse(_) => {
                SolveStatus::DivergedSingularMatrix
            }
            _ => SolveStatus::DivergedMaxIters,
        }
    }
}
