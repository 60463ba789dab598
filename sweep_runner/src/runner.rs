//! The sweep state machine. One engine instance drives one session at a
//! time: `Idle → Running → {Completed, Aborted}`, with per-point phases
//! `SettingPoint → Settling → Measuring → Recording`. The loop is strictly
//! sequential within a session, since setpoints must settle before the next
//! is applied; independent sessions may run concurrently on their own
//! engine instances.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use db::error::{with_retry, RetryPolicy, StoreError};
use db::models::measurement_point::NewMeasurementPoint;
use db::models::sweep_session::{self, Axis, SessionStatus};
use db::waveform::WaveformStore;
use sea_orm::DatabaseConnection;
use tokio::time::timeout;

use crate::error::{InstrumentFault, RunnerError};
use crate::ingest::{self, IngestConfig, IngestStats, Ingestor};
use crate::instrument::Instrument;
use crate::registry::RunRegistry;
use crate::session::{targets_json, SessionPlan};

/// Every grid point measures this full set, swept or not. Order matches the
/// measurement columns on the stored point.
pub const MEASURE_VARIABLES: [&str; 5] = ["vin", "iin", "vout", "iout", "temp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointPhase {
    SettingPoint,
    Settling,
    Measuring,
    Recording,
}

impl std::fmt::Display for PointPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PointPhase::SettingPoint => "setting-point",
            PointPhase::Settling => "settling",
            PointPhase::Measuring => "measuring",
            PointPhase::Recording => "recording",
        };
        write!(f, "{}", name)
    }
}

/// Cooperative cancellation, observed at phase boundaries. The in-flight
/// point always finishes `Recording` before the run transitions to Aborted.
#[derive(Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    pub instrument_timeout: Duration,
    pub retry: RetryPolicy,
    pub ingest: IngestConfig,
}

impl Default for RunOptions {
    fn default() -> Self {
        RunOptions {
            instrument_timeout: Duration::from_secs(5),
            retry: RetryPolicy::default(),
            ingest: IngestConfig::default(),
        }
    }
}

impl RunOptions {
    pub fn from_config() -> Self {
        let cfg = common::config::Config::get();
        let retry = RetryPolicy {
            attempts: cfg.store_retry_attempts,
            base_delay: Duration::from_millis(cfg.store_retry_base_ms),
        };
        RunOptions {
            instrument_timeout: Duration::from_millis(cfg.instrument_timeout_ms),
            retry,
            ingest: IngestConfig {
                queue_depth: cfg.ingest_queue_depth,
                retry,
                ..IngestConfig::default()
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub session_id: i64,
    pub planned_points: usize,
    pub points_recorded: u64,
    pub status: SessionStatus,
    pub ingest: IngestStats,
}

enum Outcome {
    Completed,
    Cancelled,
    Failed(RunnerError),
}

pub struct SweepRunner {
    db: DatabaseConnection,
    registry: RunRegistry,
    store: WaveformStore,
    options: RunOptions,
}

impl SweepRunner {
    pub fn new(db: DatabaseConnection, registry: RunRegistry, options: RunOptions) -> Self {
        SweepRunner {
            db,
            registry,
            store: WaveformStore::default(),
            options,
        }
    }

    pub fn with_store(mut self, store: WaveformStore) -> Self {
        self.store = store;
        self
    }

    /// Walks the session's grid to completion, abort or cancellation. On any
    /// exit the session gets its end timestamp and final status; recorded
    /// points are never discarded.
    pub async fn run<I: Instrument>(
        &self,
        session_id: i64,
        instrument: &mut I,
        cancel: &CancelHandle,
    ) -> Result<RunReport, RunnerError> {
        let session = sweep_session::Model::get_by_id(&self.db, session_id)
            .await
            .map_err(StoreError::from)?
            .ok_or_else(|| {
                StoreError::Query(sea_orm::DbErr::RecordNotFound(format!(
                    "sweep session {} not found",
                    session_id
                )))
            })?;
        if session.status != SessionStatus::Running {
            return Err(RunnerError::SessionFinished(session_id));
        }

        let axes = session.axis_list().map_err(|e| {
            StoreError::Query(sea_orm::DbErr::Custom(format!(
                "corrupt axes payload on session {}: {}",
                session_id, e
            )))
        })?;
        let plan = SessionPlan::resolve(&axes)?;
        plan.check_capabilities(&axes, &*instrument)?;

        let claim = self.registry.claim(session_id, instrument.id())?;
        log::info!(
            "session {}: sweep started, {} planned points across {} axes",
            session_id,
            plan.total_points,
            axes.len()
        );

        let ingestor = ingest::spawn(self.db.clone(), self.store, self.options.ingest);
        let (points_recorded, outcome) = self
            .walk_grid(session_id, &axes, &plan, instrument, cancel, &ingestor)
            .await;
        let ingest_stats = ingestor.finish().await;
        drop(claim);

        match outcome {
            Outcome::Completed => {
                self.finish_session(session_id, SessionStatus::Completed).await?;
                log::info!(
                    "session {}: sweep completed, {} points recorded",
                    session_id,
                    points_recorded
                );
                Ok(RunReport {
                    session_id,
                    planned_points: plan.total_points,
                    points_recorded,
                    status: SessionStatus::Completed,
                    ingest: ingest_stats,
                })
            }
            Outcome::Cancelled => {
                self.finish_session(session_id, SessionStatus::Aborted).await?;
                log::warn!(
                    "session {}: cancelled after {} of {} points",
                    session_id,
                    points_recorded,
                    plan.total_points
                );
                Ok(RunReport {
                    session_id,
                    planned_points: plan.total_points,
                    points_recorded,
                    status: SessionStatus::Aborted,
                    ingest: ingest_stats,
                })
            }
            Outcome::Failed(err) => {
                // The abort must land even if the error came from the store;
                // a failure here is logged but must not mask the root error.
                if let Err(finish_err) = self
                    .finish_session(session_id, SessionStatus::Aborted)
                    .await
                {
                    log::error!(
                        "session {}: failed to record abort: {}",
                        session_id,
                        finish_err
                    );
                }
                log::error!(
                    "session {}: aborted after {} points: {}",
                    session_id,
                    points_recorded,
                    err
                );
                Err(err)
            }
        }
    }

    async fn finish_session(
        &self,
        session_id: i64,
        status: SessionStatus,
    ) -> Result<(), RunnerError> {
        with_retry(self.options.retry, "finish session", || {
            sweep_session::Model::finish(&self.db, session_id, status.clone())
        })
        .await?;
        Ok(())
    }

    async fn walk_grid<I: Instrument>(
        &self,
        session_id: i64,
        axes: &[Axis],
        plan: &SessionPlan,
        instrument: &mut I,
        cancel: &CancelHandle,
        ingestor: &Ingestor,
    ) -> (u64, Outcome) {
        let samples_per_point = axes
            .iter()
            .map(|a| a.samples_per_point)
            .max()
            .unwrap_or(1)
            .max(1);

        let mut walker = plan.walker();
        let mut points_recorded = 0u64;
        let mut point_index = 0usize;

        while let Some(step) = walker.next_step() {
            // Phase boundary: the previous point's Recording has finished.
            if cancel.is_cancelled() {
                return (points_recorded, Outcome::Cancelled);
            }
            point_index += 1;

            // SettingPoint: only the axes whose target moved this step.
            log::debug!(
                "session {}: point {}/{} {}",
                session_id,
                point_index,
                plan.total_points,
                PointPhase::SettingPoint
            );
            for (axis, (&value, &axis_changed)) in
                axes.iter().zip(step.values.iter().zip(step.changed.iter()))
            {
                if !axis_changed {
                    continue;
                }
                if let Err(fault) = self
                    .bounded(&axis.variable, instrument.set_control(&axis.variable, value))
                    .await
                {
                    return (points_recorded, Outcome::Failed(fault.into()));
                }
            }

            // Settling: longest settle among the axes that just moved.
            let settle_ms = axes
                .iter()
                .zip(step.changed.iter())
                .filter(|(_, &axis_changed)| axis_changed)
                .map(|(axis, _)| axis.settle_ms)
                .max()
                .unwrap_or(0);
            if settle_ms > 0 {
                log::debug!(
                    "session {}: point {}/{} {} ({} ms)",
                    session_id,
                    point_index,
                    plan.total_points,
                    PointPhase::Settling,
                    settle_ms
                );
                tokio::time::sleep(Duration::from_millis(settle_ms)).await;
            }

            // Measuring: the full variable set, averaged.
            log::debug!(
                "session {}: point {}/{} {}",
                session_id,
                point_index,
                plan.total_points,
                PointPhase::Measuring
            );
            let mut measured = [None::<f64>; MEASURE_VARIABLES.len()];
            for (slot, variable) in MEASURE_VARIABLES.iter().enumerate() {
                let mut acc = 0.0;
                for _ in 0..samples_per_point {
                    match self
                        .bounded(variable, instrument.read_measurement(variable))
                        .await
                    {
                        Ok(value) => acc += value,
                        Err(fault) => {
                            // Mid-point failure: discard the partial point.
                            return (points_recorded, Outcome::Failed(fault.into()));
                        }
                    }
                }
                measured[slot] = Some(acc / samples_per_point as f64);
            }

            // Recording: one write-once point, then the waveform handoff.
            log::debug!(
                "session {}: point {}/{} {}",
                session_id,
                point_index,
                plan.total_points,
                PointPhase::Recording
            );
            let new_point = NewMeasurementPoint {
                session_id,
                targets: targets_json(axes, &step.values),
                vin_target: step.values[0],
                iout_target: step.values.get(1).copied(),
                vin_meas: measured[0],
                iin_meas: measured[1],
                vout_meas: measured[2],
                iout_meas: measured[3],
                temperature: measured[4],
                notes: None,
            };
            let point = match with_retry(self.options.retry, "record measurement point", || {
                new_point.clone().insert(&self.db)
            })
            .await
            {
                Ok(point) => point,
                Err(err) => return (points_recorded, Outcome::Failed(err.into())),
            };
            points_recorded += 1;

            match self.bounded("waveform", instrument.capture_waveform()).await {
                Ok(bursts) => {
                    for burst in bursts {
                        // Bounded queue: stalls here when ingestion is behind.
                        if !ingestor.submit(point.id, burst).await {
                            log::warn!(
                                "session {}: ingestion task gone, burst dropped",
                                session_id
                            );
                        }
                    }
                }
                Err(fault) => return (points_recorded, Outcome::Failed(fault.into())),
            }
        }

        (points_recorded, Outcome::Completed)
    }

    /// Caps a blocking instrument call at the configured timeout.
    async fn bounded<T>(
        &self,
        variable: &str,
        call: impl std::future::Future<Output = Result<T, InstrumentFault>>,
    ) -> Result<T, InstrumentFault> {
        match timeout(self.options.instrument_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(InstrumentFault::Timeout {
                variable: variable.to_string(),
                timeout_ms: self.options.instrument_timeout.as_millis() as u64,
            }),
        }
    }
}
