//! Simulated DC-DC converter bench: a power supply on `vin`, an electronic
//! load on `iout`, readback for the full measure set and an optional scope
//! channel. Used by tests and the seeder; doubles as the reference for what
//! a hardware implementation must provide.

use async_trait::async_trait;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::error::InstrumentFault;
use crate::instrument::{Burst, Capabilities, Instrument};

const SIM_EFFICIENCY: f64 = 0.9;
const SIM_VOUT: f64 = 3.3;
const BURST_LEN: usize = 100;
const BURST_SPACING_US: i64 = 10;

pub struct SimInstrument {
    id: String,
    setpoints: HashMap<String, f64>,
    noise: f64,
    waveform: bool,
    burst_clock_us: i64,
    sets_done: u32,
    reads_done: u32,
    /// Fail the (n+1)-th set_control call, counting from run start.
    pub fail_after_sets: Option<u32>,
    /// Fail the (n+1)-th read_measurement call.
    pub fail_after_reads: Option<u32>,
    call_log: Arc<Mutex<Vec<String>>>,
}

impl SimInstrument {
    pub fn new(id: &str) -> Self {
        SimInstrument {
            id: id.to_string(),
            setpoints: HashMap::new(),
            noise: 0.0,
            waveform: false,
            burst_clock_us: 0,
            sets_done: 0,
            reads_done: 0,
            fail_after_sets: None,
            fail_after_reads: None,
            call_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_noise(mut self, noise: f64) -> Self {
        self.noise = noise;
        self
    }

    pub fn with_waveform(mut self) -> Self {
        self.waveform = true;
        self
    }

    /// Shared handle to the call log; survives the run borrowing the
    /// instrument mutably.
    pub fn call_log(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.call_log)
    }

    fn jitter(&self) -> f64 {
        if self.noise == 0.0 {
            0.0
        } else {
            rand::rng().random_range(-self.noise..=self.noise)
        }
    }

    fn setpoint(&self, variable: &str) -> f64 {
        self.setpoints.get(variable).copied().unwrap_or(0.0)
    }
}

#[async_trait]
impl Instrument for SimInstrument {
    fn id(&self) -> &str {
        &self.id
    }

    async fn set_control(&mut self, variable: &str, value: f64) -> Result<(), InstrumentFault> {
        if let Some(limit) = self.fail_after_sets {
            if self.sets_done >= limit {
                return Err(InstrumentFault::Control {
                    variable: variable.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
        }
        self.sets_done += 1;
        self.call_log
            .lock()
            .unwrap()
            .push(format!("set {}={}", variable, value));
        self.setpoints.insert(variable.to_string(), value);
        Ok(())
    }

    async fn read_measurement(&mut self, variable: &str) -> Result<f64, InstrumentFault> {
        if let Some(limit) = self.fail_after_reads {
            if self.reads_done >= limit {
                return Err(InstrumentFault::Measurement {
                    variable: variable.to_string(),
                    reason: "injected failure".to_string(),
                });
            }
        }
        self.reads_done += 1;

        let vin = self.setpoint("vin");
        let iout = self.setpoint("iout");
        let pout = SIM_VOUT * iout;
        let value = match variable {
            "vin" => vin + self.jitter(),
            "iout" => iout + self.jitter(),
            "vout" => SIM_VOUT + self.jitter(),
            // Input current follows the converter model; zero vin draws
            // nothing.
            "iin" => {
                if vin == 0.0 {
                    0.0
                } else {
                    pout / (SIM_EFFICIENCY * vin) + self.jitter()
                }
            }
            "temp" => 25.0 + 3.0 * pout + self.jitter(),
            other => {
                return Err(InstrumentFault::Measurement {
                    variable: other.to_string(),
                    reason: "unknown variable".to_string(),
                });
            }
        };
        Ok(value)
    }

    fn capabilities(&self, variable: &str) -> Option<Capabilities> {
        match variable {
            "vin" => Some(Capabilities {
                min: 0.0,
                max: 40.0,
                supports_waveform: self.waveform,
            }),
            "iout" => Some(Capabilities {
                min: 0.0,
                max: 10.0,
                supports_waveform: self.waveform,
            }),
            _ => None,
        }
    }

    async fn capture_waveform(&mut self) -> Result<Vec<Burst>, InstrumentFault> {
        if !self.waveform {
            return Ok(Vec::new());
        }
        // Output-voltage ripple around the nominal rail.
        let base = self.burst_clock_us;
        let samples = (0..BURST_LEN)
            .map(|i| {
                let t = base + i as i64 * BURST_SPACING_US;
                let ripple = 0.01 * (i as f64 * 0.3).sin();
                (t, SIM_VOUT + ripple)
            })
            .collect();
        self.burst_clock_us += BURST_LEN as i64 * BURST_SPACING_US;
        Ok(vec![Burst {
            channel: 1,
            samples,
        }])
    }
}
