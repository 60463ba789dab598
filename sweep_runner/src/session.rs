//! Session definition and pre-run resolution. Axis expansion is eager: the
//! total point count is known (and surfaced) before anything touches the
//! instrument.

use db::models::sweep_session::{self, Axis};
use sea_orm::DatabaseConnection;

use crate::error::{ConfigError, RunnerError};
use crate::grid::GridWalker;
use crate::instrument::Instrument;

/// Resolved axis sequences for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPlan {
    pub sequences: Vec<Vec<f64>>,
    pub total_points: usize,
}

impl SessionPlan {
    pub fn resolve(axes: &[Axis]) -> Result<Self, ConfigError> {
        if axes.is_empty() {
            return Err(ConfigError::NoAxes);
        }
        let mut sequences = Vec::with_capacity(axes.len());
        for axis in axes {
            sequences.push(axis.resolve()?);
        }
        let total_points = sequences.iter().map(|s| s.len()).product();
        Ok(SessionPlan {
            sequences,
            total_points,
        })
    }

    pub fn walker(&self) -> GridWalker {
        GridWalker::new(self.sequences.clone())
    }

    /// Every axis target must sit inside the instrument's advertised range.
    pub fn check_capabilities<I: Instrument + ?Sized>(
        &self,
        axes: &[Axis],
        instrument: &I,
    ) -> Result<(), ConfigError> {
        for (axis, sequence) in axes.iter().zip(&self.sequences) {
            let caps = instrument
                .capabilities(&axis.variable)
                .ok_or_else(|| ConfigError::UnknownControl(axis.variable.clone()))?;
            for &value in sequence {
                if value < caps.min || value > caps.max {
                    return Err(ConfigError::TargetOutOfRange {
                        axis: axis.variable.clone(),
                        value,
                        min: caps.min,
                        max: caps.max,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Builds the per-axis target map stored on each measurement point.
pub fn targets_json(axes: &[Axis], values: &[f64]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = axes
        .iter()
        .zip(values)
        .map(|(axis, &value)| (axis.variable.clone(), serde_json::json!(value)))
        .collect();
    serde_json::Value::Object(map)
}

/// Creates a sweep session after validating its axes. Returns the stored
/// session and the planned point count, so the operator sees the grid size
/// before a potentially long run starts.
pub async fn define_session(
    db: &DatabaseConnection,
    project_id: i64,
    name: &str,
    axes: &[Axis],
    notes: Option<&str>,
) -> Result<(sweep_session::Model, usize), RunnerError> {
    let plan = SessionPlan::resolve(axes)?;

    if sweep_session::Model::find_by_name(db, project_id, name)
        .await
        .map_err(db::error::StoreError::from)?
        .is_some()
    {
        return Err(ConfigError::DuplicateName(name.to_string()).into());
    }

    let session = sweep_session::Model::create(db, project_id, name, axes, notes)
        .await
        .map_err(db::error::StoreError::from)?;
    log::info!(
        "defined session `{}` ({} axes, {} planned points)",
        name,
        axes.len(),
        plan.total_points
    );
    Ok((session, plan.total_points))
}

#[cfg(test)]
mod tests {
    use super::*;
    use db::models::sweep_session::AxisMode;

    fn axis(variable: &str, values: &[f64]) -> Axis {
        Axis {
            variable: variable.to_string(),
            mode: AxisMode::List {
                values: values.to_vec(),
            },
            settle_ms: 1,
            samples_per_point: 1,
        }
    }

    #[test]
    fn plan_multiplies_axis_lengths() {
        let axes = vec![axis("vin", &[1.0, 2.0]), axis("iout", &[0.1, 0.2, 0.3])];
        let plan = SessionPlan::resolve(&axes).unwrap();
        assert_eq!(plan.total_points, 6);
    }

    #[test]
    fn no_axes_is_a_config_error() {
        assert_eq!(SessionPlan::resolve(&[]), Err(ConfigError::NoAxes));
    }

    #[test]
    fn capability_check_catches_out_of_range_targets() {
        use crate::sim::SimInstrument;

        let axes = vec![axis("vin", &[10.0, 99.0])];
        let plan = SessionPlan::resolve(&axes).unwrap();
        let sim = SimInstrument::new("sim://bench");
        let err = plan.check_capabilities(&axes, &sim).unwrap_err();
        assert!(matches!(err, ConfigError::TargetOutOfRange { .. }));
    }

    #[test]
    fn unknown_control_variable_rejected() {
        use crate::sim::SimInstrument;

        let axes = vec![axis("phase_shift", &[1.0])];
        let plan = SessionPlan::resolve(&axes).unwrap();
        let sim = SimInstrument::new("sim://bench");
        assert_eq!(
            plan.check_capabilities(&axes, &sim),
            Err(ConfigError::UnknownControl("phase_shift".to_string()))
        );
    }

    #[test]
    fn targets_json_maps_variables_to_values() {
        let axes = vec![axis("vin", &[1.0]), axis("iout", &[1.0])];
        let json = targets_json(&axes, &[12.0, 2.5]);
        assert_eq!(json, serde_json::json!({ "vin": 12.0, "iout": 2.5 }));
    }

    #[tokio::test]
    async fn duplicate_session_name_rejected_before_insert() {
        let db = db::test_utils::setup_test_db().await;
        let project = db::factories::project(&db, "cfg").await;
        let axes = vec![axis("vin", &[1.0])];

        define_session(&db, project.id, "sweep", &axes, None)
            .await
            .unwrap();
        let dup = define_session(&db, project.id, "sweep", &axes, None).await;
        assert!(matches!(
            dup,
            Err(RunnerError::Config(ConfigError::DuplicateName(_)))
        ));
    }

    #[tokio::test]
    async fn invalid_axis_rejected_without_touching_the_store() {
        let db = db::test_utils::setup_test_db().await;
        let project = db::factories::project(&db, "cfg2").await;
        let axes = vec![axis("vin", &[])];

        let err = define_session(&db, project.id, "sweep", &axes, None).await;
        assert!(matches!(
            err,
            Err(RunnerError::Config(ConfigError::EmptyAxis(_)))
        ));
        assert!(
            db::models::sweep_session::Model::find_by_name(&db, project.id, "sweep")
                .await
                .unwrap()
                .is_none()
        );
    }
}
