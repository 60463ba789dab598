use chrono::{DateTime, Utc};
use sea_orm::ActiveValue::Set;
use sea_orm::entity::prelude::*;
use sea_orm::{DatabaseConnection, QueryOrder};

/// Lifecycle state of a sweep session.
#[derive(Debug, Clone, PartialEq, Eq, EnumIter, DeriveActiveEnum, serde::Serialize)]
#[serde(rename_all = "snake_case")]
#[sea_orm(rs_type = "String", db_type = "Enum", enum_name = "session_status_enum")]
pub enum SessionStatus {
    /// Engine is (or was last seen) walking the grid.
    #[sea_orm(string_value = "running")]
    Running,
    /// All grid points recorded.
    #[sea_orm(string_value = "completed")]
    Completed,
    /// Stopped early; recorded points are kept.
    #[sea_orm(string_value = "aborted")]
    Aborted,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status_str = match self {
            SessionStatus::Running => "running",
            SessionStatus::Completed => "completed",
            SessionStatus::Aborted => "aborted",
        };
        write!(f, "{}", status_str)
    }
}

/// Value generation for one control axis.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum AxisMode {
    List { values: Vec<f64> },
    Range { start: f64, stop: f64, step: f64 },
}

/// One independently varied control dimension. Axis order in the session's
/// list defines loop nesting: first axis outermost.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Axis {
    pub variable: String,
    #[serde(flatten)]
    pub mode: AxisMode,
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
    #[serde(default = "default_samples_per_point")]
    pub samples_per_point: u32,
}

fn default_settle_ms() -> u64 {
    100
}

fn default_samples_per_point() -> u32 {
    1
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AxisError {
    #[error("axis `{0}` has an empty value list")]
    EmptyValues(String),
    #[error("axis `{0}` has a zero step")]
    ZeroStep(String),
    #[error("axis `{0}`: step sign contradicts stop - start")]
    StepSign(String),
}

impl Axis {
    /// Expands the axis into its concrete ordered target sequence. Eager, so
    /// the total grid size is known before a run starts.
    pub fn resolve(&self) -> Result<Vec<f64>, AxisError> {
        match &self.mode {
            AxisMode::List { values } => {
                if values.is_empty() {
                    return Err(AxisError::EmptyValues(self.variable.clone()));
                }
                Ok(values.clone())
            }
            AxisMode::Range { start, stop, step } => {
                if *step == 0.0 {
                    return Err(AxisError::ZeroStep(self.variable.clone()));
                }
                let span = stop - start;
                if span * step < 0.0 {
                    return Err(AxisError::StepSign(self.variable.clone()));
                }
                // Last value may overshoot `stop` by up to half a step, so a
                // stop that is "one step away" in floating point still lands.
                let count = (span / step + 0.5).floor() as usize + 1;
                Ok((0..count).map(|i| start + step * i as f64).collect())
            }
        }
    }
}

/// Total grid size for an axis list: the product of all sequence lengths.
pub fn planned_points(axes: &[Axis]) -> Result<usize, AxisError> {
    let mut total = 1usize;
    for axis in axes {
        total *= axis.resolve()?.len();
    }
    Ok(total)
}

/// One sweep over the Cartesian grid defined by its axes. Unique per
/// `(project_id, name)`.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, serde::Serialize)]
#[sea_orm(table_name = "sweep_sessions")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i64,
    pub project_id: i64,
    pub name: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Serialized ordered `Vec<Axis>`; use [`Model::axis_list`] to decode.
    pub axes: Json,
    pub status: SessionStatus,
    pub notes: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::project::Entity",
        from = "Column::ProjectId",
        to = "super::project::Column::Id"
    )]
    Project,
    #[sea_orm(has_many = "super::measurement_point::Entity")]
    Points,
}

impl Related<super::project::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Project.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl Related<super::measurement_point::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Points.def()
    }
    fn via() -> Option<RelationDef> {
        None
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    pub async fn create(
        db: &DatabaseConnection,
        project_id: i64,
        name: &str,
        axes: &[Axis],
        notes: Option<&str>,
    ) -> Result<Self, DbErr> {
        let axes_json = serde_json::to_value(axes).map_err(|e| DbErr::Custom(e.to_string()))?;
        ActiveModel {
            project_id: Set(project_id),
            name: Set(name.to_string()),
            started_at: Set(Utc::now()),
            ended_at: Set(None),
            axes: Set(axes_json),
            status: Set(SessionStatus::Running),
            notes: Set(notes.map(|n| n.to_string())),
            ..Default::default()
        }
        .insert(db)
        .await
    }

    pub async fn get_by_id(db: &DatabaseConnection, id: i64) -> Result<Option<Self>, DbErr> {
        Entity::find_by_id(id).one(db).await
    }

    pub async fn find_by_name(
        db: &DatabaseConnection,
        project_id: i64,
        name: &str,
    ) -> Result<Option<Self>, DbErr> {
        Entity::find()
            .filter(Column::ProjectId.eq(project_id))
            .filter(Column::Name.eq(name))
            .one(db)
            .await
    }

    pub fn axis_list(&self) -> Result<Vec<Axis>, serde_json::Error> {
        serde_json::from_value(self.axes.clone())
    }

    /// Terminal transition: sets `ended_at` and the final status. Called for
    /// both completion and abort; already-recorded points are never touched.
    pub async fn finish(
        db: &DatabaseConnection,
        id: i64,
        status: SessionStatus,
    ) -> Result<(), DbErr> {
        let active = ActiveModel {
            id: Set(id),
            ended_at: Set(Some(Utc::now())),
            status: Set(status),
            ..Default::default()
        };
        Entity::update(active).exec(db).await?;
        Ok(())
    }

    pub async fn points(
        &self,
        db: &DatabaseConnection,
    ) -> Result<Vec<super::measurement_point::Model>, DbErr> {
        super::measurement_point::Entity::find()
            .filter(super::measurement_point::Column::SessionId.eq(self.id))
            .order_by_asc(super::measurement_point::Column::RecordedAt)
            .order_by_asc(super::measurement_point::Column::Id)
            .all(db)
            .await
    }

    pub async fn delete_by_id(db: &DatabaseConnection, id: i64) -> Result<(), DbErr> {
        Entity::delete_by_id(id).exec(db).await?;
        Ok(())
    }
}
