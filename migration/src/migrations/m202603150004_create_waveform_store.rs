use sea_orm_migration::prelude::*;

pub struct Migration;

impl MigrationName for Migration {
    fn name(&self) -> &str {
        "m202603150004_create_waveform_store"
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Chunk registry. The sample tables themselves are created on demand
        // by the waveform store, one per time range, so appends never touch
        // historical chunks.
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("waveform_chunks"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("chunk_start_us"))
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("chunk_end_us"))
                            .big_integer()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("table_name"))
                            .string()
                            .not_null()
                            .unique_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp()
                            .not_null()
                            .default(Expr::cust("CURRENT_TIMESTAMP")),
                    )
                    .to_owned(),
            )
            .await?;

        // Single-row sequence for sample ids; ids stay monotonic across
        // chunk tables without a shared autoincrement.
        manager
            .create_table(
                Table::create()
                    .table(Alias::new("waveform_sample_seq"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("id"))
                            .integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("next_id"))
                            .big_integer()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        let seed = Query::insert()
            .into_table(Alias::new("waveform_sample_seq"))
            .columns([Alias::new("id"), Alias::new("next_id")])
            .values_panic([1.into(), 1.into()])
            .to_owned();
        manager.exec_stmt(seed).await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(Alias::new("waveform_sample_seq"))
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Alias::new("waveform_chunks")).to_owned())
            .await
    }
}
