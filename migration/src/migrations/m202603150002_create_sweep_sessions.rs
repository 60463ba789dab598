use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202603150002_create_sweep_sessions"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("sweep_sessions"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .big_integer()
                            .not_null()
                            .auto_increment()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("project_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("name")).string().not_null())
                    .col(
                        ColumnDef::new(Alias::new("started_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .col(ColumnDef::new(Alias::new("ended_at")).timestamp().null())
                    // Ordered axis definitions, serialized; order defines loop nesting.
                    .col(ColumnDef::new(Alias::new("axes")).json().not_null())
                    .col(
                        ColumnDef::new(Alias::new("status"))
                            .string_len(20)
                            .not_null()
                            .default("running"),
                    )
                    .col(ColumnDef::new(Alias::new("notes")).text().null())
                    .index(
                        Index::create()
                            .name("uq_sessions_project_name")
                            .col(Alias::new("project_id"))
                            .col(Alias::new("name"))
                            .unique(),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_sessions_project")
                            .from(Alias::new("sweep_sessions"), Alias::new("project_id"))
                            .to(Alias::new("projects"), Alias::new("id"))
                            .on_delete(ForeignKeyAction::Cascade)
                            .on_update(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_sessions_started_at")
                    .table(Alias::new("sweep_sessions"))
                    .col(Alias::new("started_at"))
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Alias::new("sweep_sessions")).to_owned())
            .await
    }
}
