use sea_orm_migration::prelude::*;

use crate::migrations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(migrations::m202603150001_create_projects::Migration),
            Box::new(migrations::m202603150002_create_sweep_sessions::Migration),
            Box::new(migrations::m202603150003_create_measurement_points::Migration),
            Box::new(migrations::m202603150004_create_waveform_store::Migration),
        ]
    }
}
