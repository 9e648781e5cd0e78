use thiserror::Error;

/// Validation errors on domain values.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A plan violates a structural invariant.
    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    /// A reprioritization rule is out of bounds.
    #[error("invalid reprioritization rule: {0}")]
    InvalidRule(String),
}
