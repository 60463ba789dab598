//! Analytics queries over recorded sweep data: efficiency maps, extremum
//! lookup with waveform context, and per-session summaries.

use sea_orm::{
    ColumnTrait, ConnectionTrait, DatabaseConnection, DbBackend, EntityTrait, QueryFilter,
    QueryOrder, Statement,
};

use crate::error::StoreError;
use crate::models::measurement_point::{self, Entity as MeasurementPoint};
use crate::waveform::{SampleRow, WaveformStore};

/// All measured points of a session ordered by `(vin_target, iout_target)`,
/// the 2-D grid view used for efficiency-map plots.
pub async fn efficiency_map(
    db: &DatabaseConnection,
    session_id: i64,
) -> Result<Vec<measurement_point::Model>, StoreError> {
    MeasurementPoint::find()
        .filter(measurement_point::Column::SessionId.eq(session_id))
        .filter(measurement_point::Column::Efficiency.is_not_null())
        .order_by_asc(measurement_point::Column::VinTarget)
        .order_by_asc(measurement_point::Column::IoutTarget)
        .all(db)
        .await
        .map_err(StoreError::from)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Extremum {
    Min,
    Max,
}

/// The point with minimum (or maximum) efficiency in a session, together
/// with its waveform samples inside the caller's time window.
pub async fn extremum_point(
    db: &DatabaseConnection,
    store: &WaveformStore,
    session_id: i64,
    which: Extremum,
    window: (i64, i64),
) -> Result<Option<(measurement_point::Model, Vec<SampleRow>)>, StoreError> {
    let query = MeasurementPoint::find()
        .filter(measurement_point::Column::SessionId.eq(session_id))
        .filter(measurement_point::Column::Efficiency.is_not_null());
    let query = match which {
        Extremum::Min => query.order_by_asc(measurement_point::Column::Efficiency),
        Extremum::Max => query.order_by_desc(measurement_point::Column::Efficiency),
    };

    let point = match query.one(db).await.map_err(StoreError::from)? {
        Some(point) => point,
        None => return Ok(None),
    };

    let samples = if point.has_waveform {
        store.samples_in_window(db, point.id, None, window).await?
    } else {
        Vec::new()
    };
    Ok(Some((point, samples)))
}

/// Aggregate view of one session's recorded points.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub total_points: i64,
    pub measured_points: i64,
    pub waveform_points: i64,
    pub avg_efficiency: Option<f64>,
    pub min_efficiency: Option<f64>,
    pub max_efficiency: Option<f64>,
    pub avg_temperature: Option<f64>,
}

pub async fn session_summary(
    db: &DatabaseConnection,
    session_id: i64,
) -> Result<SessionSummary, StoreError> {
    let row = db
        .query_one(Statement::from_sql_and_values(
            DbBackend::Sqlite,
            "SELECT COUNT(*) AS total_points, \
             COUNT(efficiency) AS measured_points, \
             SUM(has_waveform) AS waveform_points, \
             AVG(efficiency) AS avg_efficiency, \
             MIN(efficiency) AS min_efficiency, \
             MAX(efficiency) AS max_efficiency, \
             AVG(temperature) AS avg_temperature \
             FROM measurement_points WHERE session_id = ?",
            [session_id.into()],
        ))
        .await?
        .ok_or_else(|| {
            StoreError::Query(sea_orm::DbErr::Custom(
                "summary query returned no row".to_string(),
            ))
        })?;

    Ok(SessionSummary {
        total_points: row.try_get("", "total_points")?,
        measured_points: row.try_get("", "measured_points")?,
        waveform_points: row.try_get::<Option<i64>>("", "waveform_points")?.unwrap_or(0),
        avg_efficiency: row.try_get("", "avg_efficiency")?,
        min_efficiency: row.try_get("", "min_efficiency")?,
        max_efficiency: row.try_get("", "max_efficiency")?,
        avg_temperature: row.try_get("", "avg_temperature")?,
    })
}
