use db::error::StoreError;
use db::models::sweep_session::AxisError;
use thiserror::Error;

/// Rejected before a run starts; never partially applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("[CFG-001] session `{0}` already exists in this project")]
    DuplicateName(String),
    #[error("[CFG-002] axis `{0}` has an empty value list")]
    EmptyAxis(String),
    #[error("[CFG-002] session has no axes")]
    NoAxes,
    #[error("[CFG-003] {0}")]
    BadStep(AxisError),
    #[error("[CFG-004] axis `{axis}` target {value} outside instrument range [{min}, {max}]")]
    TargetOutOfRange {
        axis: String,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("[CFG-005] instrument has no control named `{0}`")]
    UnknownControl(String),
}

impl From<AxisError> for ConfigError {
    fn from(err: AxisError) -> Self {
        match err {
            AxisError::EmptyValues(axis) => ConfigError::EmptyAxis(axis),
            other => ConfigError::BadStep(other),
        }
    }
}

/// A control or measurement call failed. Always aborts the run; never
/// swallowed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InstrumentFault {
    #[error("[INST-001] control write failed for `{variable}`: {reason}")]
    Control { variable: String, reason: String },
    #[error("[INST-002] measurement failed for `{variable}`: {reason}")]
    Measurement { variable: String, reason: String },
    #[error("[INST-003] `{variable}` timed out after {timeout_ms} ms")]
    Timeout { variable: String, timeout_ms: u64 },
}

/// A malformed sample burst. The burst is dropped; ingestion continues.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("[VALID-001] empty burst for channel {0}")]
    EmptyBurst(i32),
    #[error("[VALID-002] non-monotonic timestamps in burst for channel {0}")]
    NonMonotonic(i32),
    #[error("[VALID-003] channel {0} out of range (1..={1})")]
    ChannelOutOfRange(i32, i32),
}

impl ValidationError {
    pub fn code(&self) -> &'static str {
        match self {
            ValidationError::EmptyBurst(_) => "[VALID-001]",
            ValidationError::NonMonotonic(_) => "[VALID-002]",
            ValidationError::ChannelOutOfRange(..) => "[VALID-003]",
        }
    }
}

#[derive(Debug, Error)]
pub enum RunnerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Instrument(#[from] InstrumentFault),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("[RUN-001] session {0} already has a running sweep")]
    AlreadyRunning(i64),
    #[error("[RUN-002] instrument `{0}` is claimed by another session")]
    InstrumentClaimed(String),
    #[error("[RUN-003] session {0} has already finished")]
    SessionFinished(i64),
}
