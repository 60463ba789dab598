//! Waveform ingestion pipeline: a bounded queue feeding a writer task that
//! validates bursts and bulk-inserts them through the chunk store. The
//! bounded queue is the engine's backpressure; when ingestion falls behind,
//! `Recording` awaits queue space instead of growing memory.

use db::error::{RetryPolicy, StoreError};
use db::waveform::{Sample, WaveformStore};
use sea_orm::DatabaseConnection;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::error::ValidationError;
use crate::instrument::Burst;

#[derive(Debug, Clone, Copy)]
pub struct IngestConfig {
    /// Pending bursts before the engine stalls at `Recording`.
    pub queue_depth: usize,
    /// Highest acceptable scope channel number.
    pub max_channel: i32,
    pub retry: RetryPolicy,
}

impl Default for IngestConfig {
    fn default() -> Self {
        IngestConfig {
            queue_depth: 16,
            max_channel: 4,
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IngestStats {
    pub bursts_stored: u64,
    pub bursts_rejected: u64,
    pub samples_stored: u64,
    pub store_failures: u64,
}

struct BurstMessage {
    point_id: i64,
    burst: Burst,
}

pub struct Ingestor {
    tx: mpsc::Sender<BurstMessage>,
    handle: JoinHandle<IngestStats>,
}

pub fn validate_burst(burst: &Burst, max_channel: i32) -> Result<(), ValidationError> {
    if burst.samples.is_empty() {
        return Err(ValidationError::EmptyBurst(burst.channel));
    }
    if burst.channel < 1 || burst.channel > max_channel {
        return Err(ValidationError::ChannelOutOfRange(
            burst.channel,
            max_channel,
        ));
    }
    if burst.samples.windows(2).any(|w| w[1].0 < w[0].0) {
        return Err(ValidationError::NonMonotonic(burst.channel));
    }
    Ok(())
}

pub fn spawn(db: DatabaseConnection, store: WaveformStore, config: IngestConfig) -> Ingestor {
    let (tx, mut rx) = mpsc::channel::<BurstMessage>(config.queue_depth.max(1));

    let handle = tokio::spawn(async move {
        let mut stats = IngestStats::default();
        while let Some(msg) = rx.recv().await {
            if let Err(err) = validate_burst(&msg.burst, config.max_channel) {
                log::warn!("burst rejected for point {}: {}", msg.point_id, err);
                stats.bursts_rejected += 1;
                continue;
            }

            let samples: Vec<Sample> = msg
                .burst
                .samples
                .iter()
                .map(|&(timestamp_us, value)| Sample {
                    timestamp_us,
                    channel: msg.burst.channel,
                    value,
                })
                .collect();

            match store_with_retry(&store, &db, msg.point_id, &samples, config.retry).await {
                Ok(n) => {
                    stats.bursts_stored += 1;
                    stats.samples_stored += n;
                }
                Err(err) => {
                    log::error!(
                        "{} dropping burst for point {}: {}",
                        err.code(),
                        msg.point_id,
                        err
                    );
                    stats.store_failures += 1;
                }
            }
        }
        stats
    });

    Ingestor { tx, handle }
}

async fn store_with_retry(
    store: &WaveformStore,
    db: &DatabaseConnection,
    point_id: i64,
    samples: &[Sample],
    policy: RetryPolicy,
) -> Result<u64, StoreError> {
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match store.ingest(db, point_id, samples).await {
            Ok(n) => return Ok(n),
            Err(err) if err.is_transient() && attempt < policy.attempts.max(1) => {
                log::warn!(
                    "{} waveform ingest failed (attempt {}/{}), retrying in {:?}",
                    err.code(),
                    attempt,
                    policy.attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
            Err(err) => return Err(err),
        }
    }
}

impl Ingestor {
    /// Hands one burst to the writer task. Blocks while the queue is full;
    /// returns false if the writer died.
    pub async fn submit(&self, point_id: i64, burst: Burst) -> bool {
        self.tx.send(BurstMessage { point_id, burst }).await.is_ok()
    }

    /// Closes the queue and waits for the writer to drain it.
    pub async fn finish(self) -> IngestStats {
        drop(self.tx);
        self.handle.await.unwrap_or_default()
    }
}
