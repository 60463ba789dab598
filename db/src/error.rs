use sea_orm::DbErr;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

/// Store failures, tagged with the operator-facing code reported alongside
/// every message.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("[DB-001] connection failure: {0}")]
    Connection(DbErr),
    #[error("[DB-003] store timeout: {0}")]
    Timeout(DbErr),
    #[error("[DB-002] integrity violation: {0}")]
    Integrity(DbErr),
    #[error("[DB-002] query failed: {0}")]
    Query(DbErr),
}

impl StoreError {
    pub fn code(&self) -> &'static str {
        match self {
            StoreError::Connection(_) => "[DB-001]",
            StoreError::Timeout(_) => "[DB-003]",
            StoreError::Integrity(_) | StoreError::Query(_) => "[DB-002]",
        }
    }

    /// Transient failures are worth retrying; integrity violations never are.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Connection(_) | StoreError::Timeout(_))
    }

    pub fn classify(err: DbErr) -> Self {
        let msg = err.to_string();
        if matches!(err, DbErr::Conn(_) | DbErr::ConnectionAcquire(_)) {
            return StoreError::Connection(err);
        }
        if msg.contains("timed out") || msg.contains("database is locked") {
            return StoreError::Timeout(err);
        }
        if msg.contains("UNIQUE constraint failed") || msg.contains("FOREIGN KEY constraint failed")
        {
            return StoreError::Integrity(err);
        }
        StoreError::Query(err)
    }
}

impl From<DbErr> for StoreError {
    fn from(err: DbErr) -> Self {
        StoreError::classify(err)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 3,
            base_delay: Duration::from_millis(50),
        }
    }
}

/// Runs a store operation, retrying transient failures with exponential
/// backoff. Integrity violations surface on the first occurrence.
pub async fn with_retry<T, F, Fut>(
    policy: RetryPolicy,
    op_name: &str,
    mut op: F,
) -> Result<T, StoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DbErr>>,
{
    let mut delay = policy.base_delay;
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                let err = StoreError::classify(err);
                if !err.is_transient() || attempt >= policy.attempts.max(1) {
                    return Err(err);
                }
                log::warn!(
                    "{} {} failed (attempt {}/{}), retrying in {:?}",
                    err.code(),
                    op_name,
                    attempt,
                    policy.attempts,
                    delay
                );
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }
    }
}
