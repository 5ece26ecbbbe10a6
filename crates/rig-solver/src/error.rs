//! Error types for the equilibrium core.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, SolveError>;

/// Fatal solve failures. Recoverable driver outcomes (non-convergence,
/// NaN displacement, iteration budget) travel on the outcome types instead
/// so continuation can retry with a smaller step.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SolveError {
    #[error("payload rejected: {0}")]
    InvalidPayload(#[from] rig_model::PayloadError),

    #[error("element `{element}` produced an explosive force ({magnitude:.3e} N)")]
    NumericalExplosion { element: String, magnitude: f64 },

    #[error("model construction failed: {0}")]
    Model(String),

    #[error("continuation gave up in phase `{phase}`: {detail}")]
    Continuation { phase: String, detail: String },
}
