//! End-to-end engine scenarios against the in-memory store and the
//! simulated bench.

use async_trait::async_trait;
use db::models::sweep_session::{self, Axis, AxisMode, SessionStatus};
use db::test_utils::setup_test_db;
use db::waveform::WaveformStore;
use sea_orm::DatabaseConnection;
use sweep_runner::error::{InstrumentFault, RunnerError};
use sweep_runner::instrument::{Burst, Capabilities, Instrument};
use sweep_runner::runner::{CancelHandle, RunOptions, SweepRunner};
use sweep_runner::session::define_session;
use sweep_runner::sim::SimInstrument;
use sweep_runner::RunRegistry;

fn list_axis(variable: &str, values: &[f64]) -> Axis {
    Axis {
        variable: variable.to_string(),
        mode: AxisMode::List {
            values: values.to_vec(),
        },
        settle_ms: 0,
        samples_per_point: 1,
    }
}

fn grid_5x5() -> Vec<Axis> {
    vec![
        list_axis("vin", &[10.0, 11.0, 12.0, 13.0, 14.0]),
        list_axis("iout", &[0.1, 0.5, 1.0, 2.0, 3.0]),
    ]
}

async fn make_session(db: &DatabaseConnection, axes: &[Axis]) -> (i64, usize) {
    let project = db::factories::project(db, "sweep-tests").await;
    let (session, planned) = define_session(db, project.id, "run-1", axes, None)
        .await
        .unwrap();
    (session.id, planned)
}

fn runner(db: &DatabaseConnection) -> SweepRunner {
    SweepRunner::new(db.clone(), RunRegistry::new(), RunOptions::default())
}

#[tokio::test]
async fn scenario_a_full_grid_in_row_major_order() {
    let db = setup_test_db().await;
    let (session_id, planned) = make_session(&db, &grid_5x5()).await;
    assert_eq!(planned, 25);

    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    let report = runner(&db).run(session_id, &mut sim, &cancel).await.unwrap();

    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.points_recorded, 25);

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Completed);
    assert!(session.ended_at.is_some());

    // Row-major (vin outer, iout inner), exactly as declared.
    let points = session.points(&db).await.unwrap();
    assert_eq!(points.len(), 25);
    let mut expected = Vec::new();
    for vin in [10.0, 11.0, 12.0, 13.0, 14.0] {
        for iout in [0.1, 0.5, 1.0, 2.0, 3.0] {
            expected.push((vin, iout));
        }
    }
    let visited: Vec<(f64, f64)> = points
        .iter()
        .map(|p| (p.vin_target, p.iout_target.unwrap()))
        .collect();
    assert_eq!(visited, expected);

    // The noise-free simulator runs at exactly its modelled efficiency.
    for point in &points {
        if point.iout_target.unwrap() > 0.0 {
            assert!((point.efficiency.unwrap() - 90.0).abs() < 1e-6);
        }
    }
}

#[tokio::test]
async fn scenario_b_instrument_failure_keeps_recorded_points() {
    let db = setup_test_db().await;
    let (session_id, _) = make_session(&db, &grid_5x5()).await;

    // Five reads per point: the 61st read is the 13th point's first.
    let mut sim = SimInstrument::new("sim://bench");
    sim.fail_after_reads = Some(60);

    let cancel = CancelHandle::new();
    let err = runner(&db)
        .run(session_id, &mut sim, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RunnerError::Instrument(InstrumentFault::Measurement { .. })
    ));

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);
    assert!(session.ended_at.is_some());
    assert_eq!(session.points(&db).await.unwrap().len(), 12);
}

#[tokio::test]
async fn setpoints_are_applied_in_axis_order_and_only_when_changed() {
    let db = setup_test_db().await;
    let axes = vec![
        list_axis("vin", &[10.0, 11.0]),
        list_axis("iout", &[0.5, 1.0]),
    ];
    let (session_id, _) = make_session(&db, &axes).await;

    let mut sim = SimInstrument::new("sim://bench");
    let log = sim.call_log();
    let cancel = CancelHandle::new();
    runner(&db).run(session_id, &mut sim, &cancel).await.unwrap();

    let calls = log.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            "set vin=10",
            "set iout=0.5",
            "set iout=1",
            // Inner axis wraps: outer axis first, in declared order.
            "set vin=11",
            "set iout=0.5",
            "set iout=1",
        ]
    );
}

#[tokio::test]
async fn identical_configurations_visit_identical_grids() {
    let db = setup_test_db().await;
    let project = db::factories::project(&db, "determinism").await;

    let mut grids = Vec::new();
    for name in ["run-a", "run-b"] {
        let (session, _) = define_session(&db, project.id, name, &grid_5x5(), None)
            .await
            .unwrap();
        let mut sim = SimInstrument::new("sim://bench");
        let cancel = CancelHandle::new();
        runner(&db).run(session.id, &mut sim, &cancel).await.unwrap();
        let points = session.points(&db).await.unwrap();
        grids.push(
            points
                .iter()
                .map(|p| (p.vin_target, p.iout_target.unwrap()))
                .collect::<Vec<_>>(),
        );
    }
    assert_eq!(grids[0], grids[1]);
}

#[tokio::test]
async fn zero_input_power_leaves_efficiency_undefined() {
    let db = setup_test_db().await;
    let axes = vec![list_axis("vin", &[0.0]), list_axis("iout", &[0.0])];
    let (session_id, _) = make_session(&db, &axes).await;

    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    runner(&db).run(session_id, &mut sim, &cancel).await.unwrap();

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    let points = session.points(&db).await.unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].pin, Some(0.0));
    assert_eq!(points[0].efficiency, None);
}

#[tokio::test]
async fn running_session_rejects_a_second_run() {
    let db = setup_test_db().await;
    let (session_id, _) = make_session(&db, &grid_5x5()).await;

    let registry = RunRegistry::new();
    // Another engine instance is mid-run on this session.
    let _claim = registry.claim(session_id, "visa://other-bench").unwrap();

    let sweep = SweepRunner::new(db.clone(), registry, RunOptions::default());
    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    let err = sweep.run(session_id, &mut sim, &cancel).await.unwrap_err();
    assert!(matches!(err, RunnerError::AlreadyRunning(id) if id == session_id));

    // Failing to start must not mark the session finished.
    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Running);
}

#[tokio::test]
async fn claimed_instrument_rejects_other_sessions() {
    let db = setup_test_db().await;
    let project = db::factories::project(&db, "claims").await;
    let (s1, _) = define_session(&db, project.id, "first", &grid_5x5(), None)
        .await
        .map(|(s, n)| (s.id, n))
        .unwrap();
    let (s2, _) = define_session(&db, project.id, "second", &grid_5x5(), None)
        .await
        .map(|(s, n)| (s.id, n))
        .unwrap();

    let registry = RunRegistry::new();
    let _claim = registry.claim(s1, "sim://bench").unwrap();

    let sweep = SweepRunner::new(db.clone(), registry, RunOptions::default());
    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    let err = sweep.run(s2, &mut sim, &cancel).await.unwrap_err();
    assert!(matches!(err, RunnerError::InstrumentClaimed(_)));
}

#[tokio::test]
async fn finished_session_cannot_run_again() {
    let db = setup_test_db().await;
    let (session_id, _) = make_session(&db, &grid_5x5()).await;

    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    let sweep = runner(&db);
    sweep.run(session_id, &mut sim, &cancel).await.unwrap();

    let err = sweep.run(session_id, &mut sim, &cancel).await.unwrap_err();
    assert!(matches!(err, RunnerError::SessionFinished(_)));
}

#[tokio::test]
async fn target_outside_capabilities_fails_before_any_point() {
    let db = setup_test_db().await;
    let axes = vec![list_axis("vin", &[10.0, 95.0])];
    let (session_id, _) = make_session(&db, &axes).await;

    let mut sim = SimInstrument::new("sim://bench");
    let cancel = CancelHandle::new();
    let err = runner(&db)
        .run(session_id, &mut sim, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, RunnerError::Config(_)));

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.points(&db).await.unwrap().len(), 0);
}

/// Wraps the simulator to fire a cancel during a chosen measurement read.
struct CancelDuringRead {
    inner: SimInstrument,
    cancel: CancelHandle,
    reads: u32,
    cancel_at_read: u32,
}

#[async_trait]
impl Instrument for CancelDuringRead {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn set_control(&mut self, variable: &str, value: f64) -> Result<(), InstrumentFault> {
        self.inner.set_control(variable, value).await
    }

    async fn read_measurement(&mut self, variable: &str) -> Result<f64, InstrumentFault> {
        self.reads += 1;
        if self.reads == self.cancel_at_read {
            self.cancel.cancel();
        }
        self.inner.read_measurement(variable).await
    }

    fn capabilities(&self, variable: &str) -> Option<Capabilities> {
        self.inner.capabilities(variable)
    }

    async fn capture_waveform(&mut self) -> Result<Vec<Burst>, InstrumentFault> {
        self.inner.capture_waveform().await
    }
}

#[tokio::test]
async fn cancellation_completes_the_in_flight_point() {
    let db = setup_test_db().await;
    let (session_id, _) = make_session(&db, &grid_5x5()).await;

    let cancel = CancelHandle::new();
    // Fires during the 2nd point's Measuring phase (5 reads per point).
    let mut instrument = CancelDuringRead {
        inner: SimInstrument::new("sim://bench"),
        cancel: cancel.clone(),
        reads: 0,
        cancel_at_read: 7,
    };

    let report = runner(&db)
        .run(session_id, &mut instrument, &cancel)
        .await
        .unwrap();

    // The in-flight point finished Recording; nothing after it started.
    assert_eq!(report.status, SessionStatus::Aborted);
    assert_eq!(report.points_recorded, 2);

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(session.status, SessionStatus::Aborted);
    assert!(session.ended_at.is_some());
    assert_eq!(session.points(&db).await.unwrap().len(), 2);
}

/// Emits one malformed burst alongside every valid one.
struct NoisyScopeInstrument {
    inner: SimInstrument,
}

#[async_trait]
impl Instrument for NoisyScopeInstrument {
    fn id(&self) -> &str {
        self.inner.id()
    }

    async fn set_control(&mut self, variable: &str, value: f64) -> Result<(), InstrumentFault> {
        self.inner.set_control(variable, value).await
    }

    async fn read_measurement(&mut self, variable: &str) -> Result<f64, InstrumentFault> {
        self.inner.read_measurement(variable).await
    }

    fn capabilities(&self, variable: &str) -> Option<Capabilities> {
        self.inner.capabilities(variable)
    }

    async fn capture_waveform(&mut self) -> Result<Vec<Burst>, InstrumentFault> {
        let mut bursts = self.inner.capture_waveform().await?;
        // Timestamps running backwards: must be rejected, not stored.
        bursts.push(Burst {
            channel: 1,
            samples: vec![(100, 1.0), (50, 1.0)],
        });
        Ok(bursts)
    }
}

#[tokio::test]
async fn malformed_bursts_are_rejected_without_stopping_ingestion() {
    let db = setup_test_db().await;
    let axes = vec![list_axis("vin", &[12.0]), list_axis("iout", &[0.5, 1.0])];
    let (session_id, _) = make_session(&db, &axes).await;

    let store = WaveformStore::default();
    let mut instrument = NoisyScopeInstrument {
        inner: SimInstrument::new("sim://bench").with_waveform(),
    };
    let cancel = CancelHandle::new();
    let report = SweepRunner::new(db.clone(), RunRegistry::new(), RunOptions::default())
        .with_store(store)
        .run(session_id, &mut instrument, &cancel)
        .await
        .unwrap();

    // One good and one bad burst per point; the bad ones never abort the run.
    assert_eq!(report.status, SessionStatus::Completed);
    assert_eq!(report.ingest.bursts_stored, 2);
    assert_eq!(report.ingest.bursts_rejected, 2);
    assert_eq!(report.ingest.samples_stored, 200);
}

#[tokio::test]
async fn waveform_capture_flows_through_ingestion() {
    let db = setup_test_db().await;
    let axes = vec![
        list_axis("vin", &[12.0]),
        list_axis("iout", &[0.5, 1.0]),
    ];
    let (session_id, _) = make_session(&db, &axes).await;

    let store = WaveformStore::default();
    let mut sim = SimInstrument::new("sim://bench").with_waveform();
    let cancel = CancelHandle::new();
    let report = SweepRunner::new(db.clone(), RunRegistry::new(), RunOptions::default())
        .with_store(store)
        .run(session_id, &mut sim, &cancel)
        .await
        .unwrap();

    assert_eq!(report.points_recorded, 2);
    assert_eq!(report.ingest.bursts_stored, 2);
    assert_eq!(report.ingest.bursts_rejected, 0);
    assert_eq!(report.ingest.samples_stored, 200);

    let session = sweep_session::Model::get_by_id(&db, session_id)
        .await
        .unwrap()
        .unwrap();
    for point in session.points(&db).await.unwrap() {
        assert!(point.has_waveform);
        assert_eq!(store.count_for_point(&db, point.id).await.unwrap(), 100);
    }
}
