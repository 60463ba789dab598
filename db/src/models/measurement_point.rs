use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, PaginatorTrait};

/// One visited grid point. Scalar fields are write-once: rows are inserted by
/// the sweep engine during `Recording` and never mutated afterwards, except
/// for the `has_waveform` flag flipped by the ingestion path.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "measurement_points")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub session_id: i64,
    pub recorded_at: DateTime<Utc>,
    /// Full per-axis target map (variable → value) for N-axis sweeps.
    pub targets: Json,
    /// Projection of the first two axes, kept for 2-D efficiency maps.
    pub vin_target: f64,
    pub iout_target: Option<f64>,
    pub vin_meas: Option<f64>,
    pub iin_meas: Option<f64>,
    pub vout_meas: Option<f64>,
    pub iout_meas: Option<f64>,
    pub temperature: Option<f64>,
    pub pin: Option<f64>,
    pub pout: Option<f64>,
    pub efficiency: Option<f64>,
    pub has_waveform: bool,
    pub notes: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::sweep_session::Entity",
        from = "Column::SessionId",
        to = "super::sweep_session::Column::Id"
    )]
    Session,
}

impl Related<super::sweep_session::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Session.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Derived power figures for one point. `efficiency` is `None` when no input
/// power was measured, never zero or infinite.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PowerDerivation {
    pub pin: f64,
    pub pout: f64,
    pub efficiency: Option<f64>,
}

pub fn derive_power(vin_meas: f64, iin_meas: f64, vout_meas: f64, iout_meas: f64) -> PowerDerivation {
    let pin = vin_meas * iin_meas;
    let pout = vout_meas * iout_meas;
    let efficiency = if pin == 0.0 {
        None
    } else {
        Some(100.0 * pout / pin)
    };
    PowerDerivation {
        pin,
        pout,
        efficiency,
    }
}

/// Insert payload for one grid point; built by the sweep engine's
/// `Recording` phase.
#[derive(Debug, Clone)]
pub struct NewMeasurementPoint {
    pub session_id: i64,
    pub targets: serde_json::Value,
    pub vin_target: f64,
    pub iout_target: Option<f64>,
    pub vin_meas: Option<f64>,
    pub iin_meas: Option<f64>,
    pub vout_meas: Option<f64>,
    pub iout_meas: Option<f64>,
    pub temperature: Option<f64>,
    pub notes: Option<String>,
}

impl NewMeasurementPoint {
    pub async fn insert(self, db: &DatabaseConnection) -> Result<Model, DbErr> {
        let derived = match (self.vin_meas, self.iin_meas, self.vout_meas, self.iout_meas) {
            (Some(vin), Some(iin), Some(vout), Some(iout)) => {
                Some(derive_power(vin, iin, vout, iout))
            }
            _ => None,
        };

        ActiveModel {
            session_id: Set(self.session_id),
            recorded_at: Set(Utc::now()),
            targets: Set(self.targets),
            vin_target: Set(self.vin_target),
            iout_target: Set(self.iout_target),
            vin_meas: Set(self.vin_meas),
            iin_meas: Set(self.iin_meas),
            vout_meas: Set(self.vout_meas),
            iout_meas: Set(self.iout_meas),
            temperature: Set(self.temperature),
            pin: Set(derived.map(|d| d.pin)),
            pout: Set(derived.map(|d| d.pout)),
            efficiency: Set(derived.and_then(|d| d.efficiency)),
            has_waveform: Set(false),
            notes: Set(self.notes),
            ..Default::default()
        }
        .insert(db)
        .await
    }
}

impl Model {
    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn count_for_session(db: &DatabaseConnection, session_id: i64) -> Result<u64, DbErr> {
        Entity::find()
            .filter(Column::SessionId.eq(session_id))
            .count(db)
            .await
    }
}
