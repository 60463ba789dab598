use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202603150003_create_measurement_points"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("measurement_points"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("session_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("recorded_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    // Full per-axis target map; vin/iout columns below are the
                    // 2-D projection the efficiency map sorts by.
                    .col(ColumnDef::new(Alias::new("targets")).json().not_null())
                    .col(
                        ColumnDef::new(Alias::new("vin_target"))
                            .double()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("iout_target")).double().null())
                    .col(ColumnDef::new(Alias::new("vin_meas")).double().null())
                    .col(ColumnDef::new(Alias::new("iin_meas")).double().null())
                    .col(ColumnDef::new(Alias::new("vout_meas")).double().null())
                    .col(ColumnDef::new(Alias::new("iout_meas")).double().null())
                    .col(ColumnDef::new(Alias::new("temperature")).double().null())
                    .col(ColumnDef::new(Alias::new("pin")).double().null())
                    .col(ColumnDef::new(Alias::new("pout")).double().null())
                    .col(ColumnDef::new(Alias::new("efficiency")).double().null())
                    .col(
                        ColumnDef::new(Alias::new("has_waveform"))
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(ColumnDef::new(Alias::new("notes")).text().null())
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_points_session")
                            .from(Alias::new("measurement_points"), Alias::new("session_id"))
                            .to(Alias::new("sweep_sessions"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_points_session_recorded_at")
                    .table(Alias::new("measurement_points"))
                    .col(Alias::new("session_id"))
                    .col(Alias::new("recorded_at"))
                    .to_owned(),
            )
            .await?;

        // Extremum lookups scan efficiency within a session.
        manager
            .create_index(
                Index::create()
                    .name("idx_points_session_efficiency")
                    .table(Alias::new("measurement_points"))
                    .col(Alias::new("session_id"))
                    .col(Alias::new("efficiency"))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("measurement_points"))
                    .to_owned(),
            )
            .await
    }
}
