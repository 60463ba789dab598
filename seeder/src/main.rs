//! Provisions a demo project and runs one simulated 5×5 efficiency sweep
//! end-to-end: define, execute, ingest waveforms, then print the summary
//! the analytics layer computes.

use common::config::Config;
use common::logger::init_logger;
use db::models::sweep_session::{Axis, AxisMode};
use db::queries::{self, Extremum};
use db::waveform::WaveformStore;
use migration::Migrator;
use sea_orm_migration::MigratorTrait;
use sweep_runner::runner::{CancelHandle, RunOptions, SweepRunner};
use sweep_runner::session::define_session;
use sweep_runner::sim::SimInstrument;
use sweep_runner::RunRegistry;

fn demo_axes(settle_ms: u64) -> Vec<Axis> {
    vec![
        Axis {
            variable: "vin".to_string(),
            mode: AxisMode::Range {
                start: 10.0,
                stop: 14.0,
                step: 1.0,
            },
            settle_ms,
            samples_per_point: 3,
        },
        Axis {
            variable: "iout".to_string(),
            mode: AxisMode::List {
                values: vec![0.1, 0.5, 1.0, 2.0, 3.0],
            },
            settle_ms,
            samples_per_point: 3,
        },
    ]
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let config = Config::init(".env");
    init_logger(&config.log_level, &config.log_file);

    let db = db::connect().await;
    Migrator::up(&db, None).await.expect("migrations failed");

    let project = db::models::project::Model::create(
        &db,
        "demo-buck-3v3",
        Some("simulated 12V→3.3V buck characterization"),
    )
    .await
    .expect("project already seeded? run `cargo run -p migration fresh` first");

    let axes = demo_axes(config.default_settle_ms.min(20));
    let (session, planned) = define_session(&db, project.id, "baseline-sweep", &axes, None)
        .await
        .expect("session definition failed");
    log::info!("seeding `{}`: {} planned points", session.name, planned);

    let store = WaveformStore::new(
        config.waveform_chunk_hours * 3_600_000_000,
        config.ingest_batch_size,
    );
    let sweep = SweepRunner::new(db.clone(), RunRegistry::new(), RunOptions::from_config())
        .with_store(store);
    let mut bench = SimInstrument::new("sim://demo-bench")
        .with_noise(0.02)
        .with_waveform();
    let cancel = CancelHandle::new();

    let report = sweep
        .run(session.id, &mut bench, &cancel)
        .await
        .expect("sweep failed");
    log::info!(
        "sweep {}: {} points, {} waveform bursts stored",
        report.status,
        report.points_recorded,
        report.ingest.bursts_stored
    );

    let summary = queries::session_summary(&db, session.id)
        .await
        .expect("summary query failed");
    println!(
        "session `{}`: {} points, efficiency avg {:.2}% (min {:.2}%, max {:.2}%)",
        session.name,
        summary.total_points,
        summary.avg_efficiency.unwrap_or(0.0),
        summary.min_efficiency.unwrap_or(0.0),
        summary.max_efficiency.unwrap_or(0.0),
    );

    if let Some((worst, samples)) = queries::extremum_point(
        &db,
        &store,
        session.id,
        Extremum::Min,
        (0, i64::MAX),
    )
    .await
    .expect("extremum query failed")
    {
        println!(
            "worst point: vin={:.1}V iout={:.2}A efficiency={:.2}% ({} waveform samples)",
            worst.vin_target,
            worst.iout_target.unwrap_or(0.0),
            worst.efficiency.unwrap_or(0.0),
            samples.len()
        );
    }
}
