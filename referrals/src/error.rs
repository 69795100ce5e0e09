//! Error taxonomy for solving, running and sampling

use thiserror::Error;

/// Errors raised by the solver, the runner and the Monte Carlo evaluator
///
/// "No feasible shelter" is never an error: heuristics and the solver both
/// record it as shortfall.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReferralError {
    /// Rejected before any solve attempt; never retried
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The model turned out infeasible, which signals a modelling contradiction
    #[error("infeasible model: {0}")]
    InfeasibleInput(String),

    /// The optimizer stopped without proving optimality
    #[error("solver failure: {detail}")]
    SolverFailure {
        detail: String,
        /// Best proven bound on total shortfall, when one is known
        shortfall_bound: Option<f64>,
    },

    /// Monte Carlo configuration rejected before simulation starts
    #[error("sampling error: {0}")]
    SamplingError(String),

    #[error("trial {index} panicked: {message}")]
    TrialPanicked { index: usize, message: String },
}

impl ReferralError {
    pub fn invalid(message: impl Into<String>) -> Self {
        ReferralError::InvalidInput(message.into())
    }

    pub fn solver_failure(detail: impl Into<String>) -> Self {
        ReferralError::SolverFailure {
            detail: detail.into(),
            shortfall_bound: None,
        }
    }
}

pub type Result<T, E = ReferralError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_problem() {
        let err = ReferralError::invalid("negative capacity at shelter 3");
        assert_eq!(err.to_string(), "invalid input: negative capacity at shelter 3");

        let err = ReferralError::SolverFailure {
            detail: "time budget exhausted after stage one".into(),
            shortfall_bound: Some(4.0),
        };
        assert!(err.to_string().contains("time budget"));
    }
}
