//! Ownership cascade: deleting a project must remove every descendant row,
//! including samples living in dynamically created waveform chunks.

use db::factories;
use db::models::{measurement_point, project, sweep_session};
use db::test_utils::setup_test_db;
use db::waveform::{Sample, WaveformStore};
use sea_orm::{EntityTrait, PaginatorTrait};

fn burst(count: i64, channel: i32) -> Vec<Sample> {
    (0..count)
        .map(|i| Sample {
            timestamp_us: i,
            channel,
            value: i as f64 * 0.001,
        })
        .collect()
}

#[tokio::test]
async fn project_delete_cascades_to_all_descendants() {
    let db = setup_test_db().await;
    let store = WaveformStore::default();

    let project = factories::project(&db, "cascade-target").await;
    let session = factories::running_session(&db, project.id, "run-1").await;
    let point = factories::measured_point(&db, session.id, 12.0, 1.0).await;
    store.ingest(&db, point.id, &burst(200, 1)).await.unwrap();

    assert_eq!(store.count_for_point(&db, point.id).await.unwrap(), 200);

    project::Model::delete_by_id(&db, project.id).await.unwrap();

    assert!(
        sweep_session::Entity::find_by_id(session.id)
            .one(&db)
            .await
            .unwrap()
            .is_none()
    );
    assert!(
        measurement_point::Entity::find_by_id(point.id)
            .one(&db)
            .await
            .unwrap()
            .is_none()
    );
    assert_eq!(store.count_for_point(&db, point.id).await.unwrap(), 0);
}

#[tokio::test]
async fn session_delete_leaves_sibling_sessions_alone() {
    let db = setup_test_db().await;

    let project = factories::project(&db, "multi-session").await;
    let doomed = factories::running_session(&db, project.id, "doomed").await;
    let kept = factories::running_session(&db, project.id, "kept").await;
    factories::measured_point(&db, doomed.id, 10.0, 0.5).await;
    factories::measured_point(&db, kept.id, 10.0, 0.5).await;

    sweep_session::Model::delete_by_id(&db, doomed.id)
        .await
        .unwrap();

    let remaining = measurement_point::Entity::find()
        .count(&db)
        .await
        .unwrap();
    assert_eq!(remaining, 1);
    assert!(
        sweep_session::Entity::find_by_id(kept.id)
            .one(&db)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn duplicate_session_name_within_project_rejected() {
    let db = setup_test_db().await;

    let project = factories::project(&db, "uniq").await;
    factories::running_session(&db, project.id, "sweep-a").await;

    let axes = vec![factories::list_axis("vin", &[1.0])];
    let dup = sweep_session::Model::create(&db, project.id, "sweep-a", &axes, None).await;
    assert!(dup.is_err());

    // Same name under a different project is fine.
    let other = factories::project(&db, "uniq-2").await;
    let ok = sweep_session::Model::create(&db, other.id, "sweep-a", &axes, None).await;
    assert!(ok.is_ok());
}
