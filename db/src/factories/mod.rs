//! Test fixtures. Panics are fine here; these only run inside tests and the
//! seeder.

use sea_orm::DatabaseConnection;

use crate::models::measurement_point::NewMeasurementPoint;
use crate::models::sweep_session::{Axis, AxisMode};
use crate::models::{measurement_point, project, sweep_session};

pub fn list_axis(variable: &str, values: &[f64]) -> Axis {
    Axis {
        variable: variable.to_string(),
        mode: AxisMode::List {
            values: values.to_vec(),
        },
        settle_ms: 1,
        samples_per_point: 1,
    }
}

pub async fn project(db: &DatabaseConnection, name: &str) -> project::Model {
    project::Model::create(db, name, Some("factory project"))
        .await
        .expect("factory project insert failed")
}

/// A running session with a small two-axis grid.
pub async fn running_session(
    db: &DatabaseConnection,
    project_id: i64,
    name: &str,
) -> sweep_session::Model {
    let axes = vec![
        list_axis("vin", &[10.0, 12.0]),
        list_axis("iout", &[0.5, 1.0]),
    ];
    sweep_session::Model::create(db, project_id, name, &axes, None)
        .await
        .expect("factory session insert failed")
}

/// A fully measured point with plausible converter numbers.
pub async fn measured_point(
    db: &DatabaseConnection,
    session_id: i64,
    vin: f64,
    iout: f64,
) -> measurement_point::Model {
    NewMeasurementPoint {
        session_id,
        targets: serde_json::json!({ "vin": vin, "iout": iout }),
        vin_target: vin,
        iout_target: Some(iout),
        vin_meas: Some(vin * 1.001),
        iin_meas: Some(iout * 3.3 / vin / 0.9),
        vout_meas: Some(3.3),
        iout_meas: Some(iout),
        temperature: Some(35.0),
        notes: None,
    }
    .insert(db)
    .await
    .expect("factory point insert failed")
}
