//! LH-000: Planning error taxonomy.
//!
//! Every stage returns `PlanError` and the orchestrator passes it up unchanged.
//! Categories are stable so callers can tell "fix your input" apart from
//! "this is a bug".

use thiserror::Error;

/// Stable error category surfaced to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Volume,
    NoDeckSpace,
    Dire,
    Configuration,
    Driver,
    Concentration,
    InvalidRequest,
    Simulation,
}

impl ErrorKind {
    /// True when resubmitting with different input can succeed.
    pub fn is_user_fixable(self) -> bool {
        !matches!(self, Self::Dire | Self::Driver)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PlanError {
    #[error("volume error: {0}")]
    Volume(String),
    #[error("no deck space: {0}")]
    NoDeckSpace(String),
    #[error("internal error: {0}")]
    Dire(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("driver error: {0}")]
    Driver(String),
    #[error("solution setup error: {0}")]
    Concentration(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("simulation failed: {0}")]
    Simulation(String),
}

impl PlanError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Volume(_) => ErrorKind::Volume,
            Self::NoDeckSpace(_) => ErrorKind::NoDeckSpace,
            Self::Dire(_) => ErrorKind::Dire,
            Self::Configuration(_) => ErrorKind::Configuration,
            Self::Driver(_) => ErrorKind::Driver,
            Self::Concentration(_) => ErrorKind::Concentration,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Simulation(_) => ErrorKind::Simulation,
        }
    }
}

pub type PlanResult<T> = Result<T, PlanError>;
