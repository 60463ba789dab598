//! Abstraction over the instrument/SCPI layer. The engine only ever talks to
//! this trait; hardware transports and the simulator both implement it.

use async_trait::async_trait;

use crate::error::InstrumentFault;

/// Validated limits for one control or measure variable.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capabilities {
    pub min: f64,
    pub max: f64,
    pub supports_waveform: bool,
}

/// One captured sample stream for a single scope channel. Timestamps are
/// microseconds, expected non-decreasing within the burst.
#[derive(Debug, Clone, PartialEq)]
pub struct Burst {
    pub channel: i32,
    pub samples: Vec<(i64, f64)>,
}

#[async_trait]
pub trait Instrument: Send {
    /// Stable identifier used for exclusivity claims (e.g. the VISA resource
    /// address).
    fn id(&self) -> &str;

    /// Applies one setpoint. Must not return before the hardware accepted
    /// the command; settling is the engine's job.
    async fn set_control(&mut self, variable: &str, value: f64) -> Result<(), InstrumentFault>;

    async fn read_measurement(&mut self, variable: &str) -> Result<f64, InstrumentFault>;

    /// Limits for a variable, or `None` if the instrument does not expose it
    /// as a control.
    fn capabilities(&self, variable: &str) -> Option<Capabilities>;

    /// Scope capture for the point just measured. Instruments without a
    /// waveform source return no bursts.
    async fn capture_waveform(&mut self) -> Result<Vec<Burst>, InstrumentFault> {
        Ok(Vec::new())
    }
}
