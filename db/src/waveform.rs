//! Chunked waveform sample store.
//!
//! Samples land in per-time-range chunk tables (`waveform_samples_c<n>`)
//! tracked by the `waveform_chunks` registry, so appends only ever touch the
//! chunk covering their time range and throughput stays flat as history
//! grows. Chunk tables are created on demand; each carries the composite
//! `(id, timestamp_us)` primary key and a cascading foreign key to the
//! owning measurement point, so deleting a point (or anything above it)
//! removes its samples with no orphans.

use sea_orm::{ConnectionTrait, DatabaseConnection, DbBackend, DbErr, Statement, Value};
use std::collections::BTreeMap;

use crate::error::StoreError;

/// One hour of microseconds, the default chunk span.
pub const DEFAULT_CHUNK_SPAN_US: i64 = 3_600_000_000;

/// Default maximum rows per bulk INSERT statement.
pub const DEFAULT_INSERT_BATCH: usize = 500;

/// One raw sample as produced by a capture burst.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub timestamp_us: i64,
    pub channel: i32,
    pub value: f64,
}

/// One stored sample row, with its allocated monotonic id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleRow {
    pub id: i64,
    pub timestamp_us: i64,
    pub channel: i32,
    pub value: f64,
}

/// One downsampling bucket over a fixed-width time window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bucket {
    pub bucket_start_us: i64,
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub sample_count: i64,
}

#[derive(Debug, Clone, Copy)]
pub struct WaveformStore {
    chunk_span_us: i64,
    insert_batch: usize,
}

impl Default for WaveformStore {
    fn default() -> Self {
        WaveformStore {
            chunk_span_us: DEFAULT_CHUNK_SPAN_US,
            insert_batch: DEFAULT_INSERT_BATCH,
        }
    }
}

fn chunk_table_name(index: i64) -> String {
    // Identifiers cannot carry a minus sign; pre-epoch timestamps get an
    // `m` marker instead.
    if index < 0 {
        format!("waveform_samples_cm{}", -index)
    } else {
        format!("waveform_samples_c{}", index)
    }
}

fn stmt(sql: String, values: Vec<Value>) -> Statement {
    Statement::from_sql_and_values(DbBackend::Sqlite, sql, values)
}

impl WaveformStore {
    pub fn new(chunk_span_us: i64, insert_batch: usize) -> Self {
        WaveformStore {
            chunk_span_us: chunk_span_us.max(1),
            insert_batch: insert_batch.max(1),
        }
    }

    /// Appends a burst of samples for one measurement point. Returns the
    /// number of rows written. Samples are immutable once stored.
    pub async fn ingest(
        &self,
        db: &DatabaseConnection,
        point_id: i64,
        samples: &[Sample],
    ) -> Result<u64, StoreError> {
        if samples.is_empty() {
            return Ok(0);
        }

        let base_id = self.reserve_ids(db, samples.len() as i64).await?;

        // Group rows by their chunk so each INSERT touches a single table.
        let mut by_chunk: BTreeMap<i64, Vec<(i64, &Sample)>> = BTreeMap::new();
        for (offset, sample) in samples.iter().enumerate() {
            let index = sample.timestamp_us.div_euclid(self.chunk_span_us);
            by_chunk
                .entry(index)
                .or_default()
                .push((base_id + offset as i64, sample));
        }

        for (index, rows) in &by_chunk {
            let table = self.ensure_chunk(db, *index).await?;
            for batch in rows.chunks(self.insert_batch) {
                let mut sql = format!(
                    "INSERT INTO {} (id, timestamp_us, point_id, channel, value) VALUES ",
                    table
                );
                let mut values: Vec<Value> = Vec::with_capacity(batch.len() * 5);
                for (i, (id, sample)) in batch.iter().enumerate() {
                    if i > 0 {
                        sql.push_str(", ");
                    }
                    sql.push_str("(?, ?, ?, ?, ?)");
                    values.push((*id).into());
                    values.push(sample.timestamp_us.into());
                    values.push(point_id.into());
                    values.push(sample.channel.into());
                    values.push(sample.value.into());
                }
                db.execute(stmt(sql, values)).await?;
            }
        }

        db.execute(stmt(
            "UPDATE measurement_points SET has_waveform = ? WHERE id = ?".to_string(),
            vec![true.into(), point_id.into()],
        ))
        .await?;

        Ok(samples.len() as u64)
    }

    /// All samples of a point inside `[window.0, window.1)`, ordered by
    /// timestamp. `channel = None` returns every channel.
    pub async fn samples_in_window(
        &self,
        db: &DatabaseConnection,
        point_id: i64,
        channel: Option<i32>,
        window: (i64, i64),
    ) -> Result<Vec<SampleRow>, StoreError> {
        let chunks = self.chunks_overlapping(db, window).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut parts: Vec<String> = Vec::with_capacity(chunks.len());
        let mut values: Vec<Value> = Vec::new();
        for (_, table) in &chunks {
            let mut part = format!(
                "SELECT id, timestamp_us, channel, value FROM {} \
                 WHERE point_id = ? AND timestamp_us >= ? AND timestamp_us < ?",
                table
            );
            values.push(point_id.into());
            values.push(window.0.into());
            values.push(window.1.into());
            if let Some(ch) = channel {
                part.push_str(" AND channel = ?");
                values.push(ch.into());
            }
            parts.push(part);
        }
        let sql = format!("{} ORDER BY timestamp_us, id", parts.join(" UNION ALL "));

        let rows = db.query_all(stmt(sql, values)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            out.push(SampleRow {
                id: row.try_get("", "id")?,
                timestamp_us: row.try_get("", "timestamp_us")?,
                channel: row.try_get("", "channel")?,
                value: row.try_get("", "value")?,
            });
        }
        Ok(out)
    }

    /// Fixed-width bucket aggregation over `[window.0, window.1)`. Grouping
    /// happens after the chunk UNION so avg/min/max are exact across chunk
    /// boundaries.
    pub async fn downsample(
        &self,
        db: &DatabaseConnection,
        point_id: i64,
        channel: i32,
        window: (i64, i64),
        bucket_us: i64,
    ) -> Result<Vec<Bucket>, StoreError> {
        if bucket_us <= 0 {
            return Err(StoreError::Query(DbErr::Custom(
                "bucket width must be positive".to_string(),
            )));
        }
        let chunks = self.chunks_overlapping(db, window).await?;
        if chunks.is_empty() {
            return Ok(Vec::new());
        }

        let mut values: Vec<Value> = vec![window.0.into(), bucket_us.into()];
        let mut parts: Vec<String> = Vec::with_capacity(chunks.len());
        for (_, table) in &chunks {
            parts.push(format!(
                "SELECT timestamp_us, value FROM {} \
                 WHERE point_id = ? AND channel = ? AND timestamp_us >= ? AND timestamp_us < ?",
                table
            ));
            values.push(point_id.into());
            values.push(channel.into());
            values.push(window.0.into());
            values.push(window.1.into());
        }
        let sql = format!(
            "SELECT ((timestamp_us - ?) / ?) AS bucket_idx, \
             AVG(value) AS avg_value, MIN(value) AS min_value, MAX(value) AS max_value, \
             COUNT(*) AS sample_count \
             FROM ({}) AS s GROUP BY bucket_idx ORDER BY bucket_idx",
            parts.join(" UNION ALL ")
        );

        let rows = db.query_all(stmt(sql, values)).await?;
        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let idx: i64 = row.try_get("", "bucket_idx")?;
            out.push(Bucket {
                bucket_start_us: window.0 + idx * bucket_us,
                avg: row.try_get("", "avg_value")?,
                min: row.try_get("", "min_value")?,
                max: row.try_get("", "max_value")?,
                sample_count: row.try_get("", "sample_count")?,
            });
        }
        Ok(out)
    }

    /// Total stored samples for a point, across every chunk.
    pub async fn count_for_point(
        &self,
        db: &DatabaseConnection,
        point_id: i64,
    ) -> Result<i64, StoreError> {
        let chunks = self.all_chunks(db).await?;
        let mut total = 0i64;
        for (_, table) in chunks {
            let row = db
                .query_one(stmt(
                    format!("SELECT COUNT(*) AS n FROM {} WHERE point_id = ?", table),
                    vec![point_id.into()],
                ))
                .await?;
            if let Some(row) = row {
                total += row.try_get::<i64>("", "n")?;
            }
        }
        Ok(total)
    }

    /// Number of chunk tables currently registered.
    pub async fn chunk_count(&self, db: &DatabaseConnection) -> Result<i64, StoreError> {
        let row = db
            .query_one(stmt(
                "SELECT COUNT(*) AS n FROM waveform_chunks".to_string(),
                vec![],
            ))
            .await?;
        Ok(match row {
            Some(row) => row.try_get("", "n")?,
            None => 0,
        })
    }

    async fn reserve_ids(&self, db: &DatabaseConnection, n: i64) -> Result<i64, StoreError> {
        let row = db
            .query_one(stmt(
                "UPDATE waveform_sample_seq SET next_id = next_id + ? WHERE id = 1 \
                 RETURNING next_id"
                    .to_string(),
                vec![n.into()],
            ))
            .await?
            .ok_or_else(|| {
                StoreError::Query(DbErr::RecordNotFound(
                    "waveform_sample_seq row missing".to_string(),
                ))
            })?;
        let next: i64 = row.try_get("", "next_id")?;
        Ok(next - n)
    }

    async fn ensure_chunk(
        &self,
        db: &DatabaseConnection,
        index: i64,
    ) -> Result<String, StoreError> {
        let chunk_start = index * self.chunk_span_us;
        let existing = db
            .query_one(stmt(
                "SELECT table_name FROM waveform_chunks WHERE chunk_start_us = ?".to_string(),
                vec![chunk_start.into()],
            ))
            .await?;
        if let Some(row) = existing {
            return Ok(row.try_get("", "table_name")?);
        }

        let table = chunk_table_name(index);
        db.execute_unprepared(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (\
             id INTEGER NOT NULL, \
             timestamp_us INTEGER NOT NULL, \
             point_id INTEGER NOT NULL REFERENCES measurement_points(id) ON DELETE CASCADE, \
             channel INTEGER NOT NULL, \
             value REAL NOT NULL, \
             PRIMARY KEY (id, timestamp_us))"
        ))
        .await?;
        db.execute_unprepared(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_point_channel ON {table}(point_id, channel)"
        ))
        .await?;
        db.execute_unprepared(&format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_ts ON {table}(timestamp_us)"
        ))
        .await?;

        db.execute(stmt(
            "INSERT OR IGNORE INTO waveform_chunks (chunk_start_us, chunk_end_us, table_name) \
             VALUES (?, ?, ?)"
                .to_string(),
            vec![
                chunk_start.into(),
                (chunk_start + self.chunk_span_us).into(),
                table.clone().into(),
            ],
        ))
        .await?;

        log::debug!("created waveform chunk {} [{}..)", table, chunk_start);
        Ok(table)
    }

    async fn chunks_overlapping(
        &self,
        db: &DatabaseConnection,
        window: (i64, i64),
    ) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = db
            .query_all(stmt(
                "SELECT chunk_start_us, table_name FROM waveform_chunks \
                 WHERE chunk_end_us > ? AND chunk_start_us < ? ORDER BY chunk_start_us"
                    .to_string(),
                vec![window.0.into(), window.1.into()],
            ))
            .await?;
        collect_chunk_rows(rows)
    }

    async fn all_chunks(&self, db: &DatabaseConnection) -> Result<Vec<(i64, String)>, StoreError> {
        let rows = db
            .query_all(stmt(
                "SELECT chunk_start_us, table_name FROM waveform_chunks ORDER BY chunk_start_us"
                    .to_string(),
                vec![],
            ))
            .await?;
        collect_chunk_rows(rows)
    }
}

fn collect_chunk_rows(
    rows: Vec<sea_orm::QueryResult>,
) -> Result<Vec<(i64, String)>, StoreError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push((
            row.try_get("", "chunk_start_us")?,
            row.try_get("", "table_name")?,
        ));
    }
    Ok(out)
}
