//! Validated-query execution against a relational source.
//!
//! The executor only ever sees SQL that already passed the safety gate. It
//! checks out a connection, runs the statement, and caps the result at a
//! configured row limit; the cap is surfaced as a `truncated` flag, never a
//! silent drop. The connection is a scoped guard, so it returns to the pool
//! on every exit path. One retry is allowed when the failure looks like a
//! dropped connection; anything else fails the request.

use crate::error::{DatasightError, Result};
use crate::providers::ConnectionProvider;
use crate::table::TableData;
use tracing::{info, warn};

pub struct RelationalExecutor {
    max_rows: usize,
}

impl RelationalExecutor {
    pub fn new(max_rows: usize) -> Self {
        Self { max_rows }
    }

    pub async fn execute(
        &self,
        sql: &str,
        provider: &dyn ConnectionProvider,
    ) -> Result<TableData> {
        match self.run_once(sql, provider).await {
            Ok(table) => Ok(table),
            Err(e) if is_transient(&e) => {
                warn!(error = %e, "transient execution failure, retrying once");
                self.run_once(sql, provider).await
            }
            Err(e) => Err(e),
        }
    }

    async fn run_once(&self, sql: &str, provider: &dyn ConnectionProvider) -> Result<TableData> {
        let mut conn = provider.acquire().await?;
        let mut table = conn.run_select(sql).await?;

        if table.height() > self.max_rows {
            info!(
                rows = table.height(),
                cap = self.max_rows,
                "truncating oversized result"
            );
            table.rows.truncate(self.max_rows);
            table.truncated = true;
        }
        Ok(table)
    }
}

/// Connection-drop failures are worth one fresh-acquisition retry; rejected
/// queries and exhausted pools are not.
fn is_transient(error: &DatasightError) -> bool {
    match error {
        DatasightError::Execution(msg) => {
            let lowered = msg.to_lowercase();
            ["closed", "reset", "broken", "terminated"]
                .iter()
                .any(|marker| lowered.contains(marker))
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::QueryConnection;
    use crate::schema::SchemaDescription;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FlakyProvider {
        attempts: Arc<AtomicUsize>,
        fail_first: bool,
        rows: usize,
    }

    struct FlakyConnection {
        fail: bool,
        rows: usize,
    }

    #[async_trait]
    impl QueryConnection for FlakyConnection {
        async fn run_select(&mut self, _sql: &str) -> Result<TableData> {
            if self.fail {
                return Err(DatasightError::Execution(
                    "connection closed unexpectedly".to_string(),
                ));
            }
            let rows = (0..self.rows).map(|i| vec![json!(i as i64)]).collect();
            Ok(TableData::new(vec!["n".into()], rows))
        }
    }

    #[async_trait]
    impl ConnectionProvider for FlakyProvider {
        fn identity(&self) -> String {
            "test".into()
        }

        async fn schema(&self) -> Result<SchemaDescription> {
            Ok(SchemaDescription {
                version: "v1".into(),
                tables: vec![],
            })
        }

        async fn acquire(&self) -> Result<Box<dyn QueryConnection>> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FlakyConnection {
                fail: self.fail_first && attempt == 0,
                rows: self.rows,
            }))
        }
    }

    #[tokio::test]
    async fn results_above_the_cap_are_truncated_and_flagged() {
        let provider = FlakyProvider {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_first: false,
            rows: 25,
        };
        let executor = RelationalExecutor::new(10);
        let table = executor.execute("SELECT n FROM t", &provider).await.unwrap();
        assert_eq!(table.height(), 10);
        assert!(table.truncated);
    }

    #[tokio::test]
    async fn results_under_the_cap_are_untouched() {
        let provider = FlakyProvider {
            attempts: Arc::new(AtomicUsize::new(0)),
            fail_first: false,
            rows: 5,
        };
        let executor = RelationalExecutor::new(10);
        let table = executor.execute("SELECT n FROM t", &provider).await.unwrap();
        assert_eq!(table.height(), 5);
        assert!(!table.truncated);
    }

    #[tokio::test]
    async fn dropped_connection_is_retried_once_with_fresh_acquisition() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let provider = FlakyProvider {
            attempts: attempts.clone(),
            fail_first: true,
            rows: 3,
        };
        let executor = RelationalExecutor::new(10);
        let table = executor.execute("SELECT n FROM t", &provider).await.unwrap();
        assert_eq!(table.height(), 3);
        assert_eq!(attempts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn pool_exhaustion_is_not_retried() {
        struct ExhaustedProvider {
            attempts: Arc<AtomicUsize>,
        }

        #[async_trait]
        impl ConnectionProvider for ExhaustedProvider {
            fn identity(&self) -> String {
                "test".into()
            }
            async fn schema(&self) -> Result<SchemaDescription> {
                Ok(SchemaDescription {
                    version: "v1".into(),
                    tables: vec![],
                })
            }
            async fn acquire(&self) -> Result<Box<dyn QueryConnection>> {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                Err(DatasightError::PoolExhausted(
                    std::time::Duration::from_secs(30),
                ))
            }
        }

        let attempts = Arc::new(AtomicUsize::new(0));
        let provider = ExhaustedProvider {
            attempts: attempts.clone(),
        };
        let executor = RelationalExecutor::new(10);
        let err = executor.execute("SELECT 1", &provider).await.unwrap_err();
        assert!(matches!(err, DatasightError::PoolExhausted(_)));
        assert_eq!(attempts.load(Ordering::SeqCst), 1);
    }
}
