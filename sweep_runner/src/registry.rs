//! Exclusivity bookkeeping: one running sweep per session, one session per
//! instrument. Claims are tokens released on drop, so every exit path frees
//! its session.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::error::RunnerError;

#[derive(Default)]
struct Inner {
    sessions: HashSet<i64>,
    instruments: HashSet<String>,
}

#[derive(Clone, Default)]
pub struct RunRegistry {
    inner: Arc<Mutex<Inner>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn claim(&self, session_id: i64, instrument_id: &str) -> Result<RunClaim, RunnerError> {
        let mut inner = self.inner.lock().unwrap();
        if inner.sessions.contains(&session_id) {
            return Err(RunnerError::AlreadyRunning(session_id));
        }
        if inner.instruments.contains(instrument_id) {
            return Err(RunnerError::InstrumentClaimed(instrument_id.to_string()));
        }
        inner.sessions.insert(session_id);
        inner.instruments.insert(instrument_id.to_string());
        Ok(RunClaim {
            registry: self.clone(),
            session_id,
            instrument_id: instrument_id.to_string(),
        })
    }
}

pub struct RunClaim {
    registry: RunRegistry,
    session_id: i64,
    instrument_id: String,
}

impl Drop for RunClaim {
    fn drop(&mut self) {
        let mut inner = self.registry.inner.lock().unwrap();
        inner.sessions.remove(&self.session_id);
        inner.instruments.remove(&self.instrument_id);
    }
}
