// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2024 Jonathan Lee
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License version 3
// as published by the Free Software Foundation.
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU Affero General Public License for more details.
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see https://www.gnu.org/licenses/.

use crate::database::connection::Dataset;
use crate::database::query_guard::ReadOnlyGuard;
use crate::database::types::{DatabaseError, DatabaseResult};
use estel::ResultTable;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, instrument};

pub const DEFAULT_MAX_ROWS: usize = 1000;
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs validated queries. The read-only guard is applied here, on every
/// call, whatever the caller already checked.
pub struct QueryExecutor {
    dataset: Arc<dyn Dataset>,
    guard: ReadOnlyGuard,
    timeout: Duration,
    max_rows: usize,
}
impl QueryExecutor {
    pub fn new(dataset: Arc<dyn Dataset>) -> Self {
        Self {
            dataset,
            guard: ReadOnlyGuard::new(),
            timeout: DEFAULT_QUERY_TIMEOUT,
            max_rows: DEFAULT_MAX_ROWS,
        }
    }
    pub fn with_guard(mut self, guard: ReadOnlyGuard) -> Self {
        self.guard = guard;
        self
    }
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
    pub fn with_max_rows(mut self, max_rows: usize) -> Self {
        self.max_rows = max_rows;
        self
    }
    pub fn dataset(&self) -> &Arc<dyn Dataset> {
        &self.dataset
    }

    #[instrument(skip(self), fields(dataset = self.dataset.name()))]
    pub async fn execute(&self, query: &str) -> DatabaseResult<ResultTable> {
        let query = self.guard.check(query)?;
        let started = Instant::now();
        let table = tokio::time::timeout(self.timeout, self.dataset.fetch_table(query, self.max_rows))
            .await
            .map_err(|_| {
                error!(timeout_secs = self.timeout.as_secs(), "Query timed out");
                DatabaseError::Timeout(self.timeout)
            })??;
        info!(
            rows = table.row_count(),
            columns = table.column_count(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Query executed"
        );
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::query_guard::GuardViolation;
    use async_trait::async_trait;
    use estel::Cell;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recording {
        queries: Mutex<Vec<String>>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl Dataset for Recording {
        async fn fetch_table(&self, query: &str, max_rows: usize) -> DatabaseResult<ResultTable> {
            self.queries.lock().unwrap().push(query.to_string());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let rows = (0..3i64).take(max_rows).map(|i| vec![Cell::Integer(i)]).collect();
            Ok(ResultTable::from_rows(["n"], rows).unwrap())
        }
        async fn describe_schema(&self, _: usize) -> DatabaseResult<String> {
            Ok(String::new())
        }
    }

    #[tokio::test]
    async fn forbidden_queries_never_reach_the_dataset() {
        let dataset = Arc::new(Recording::default());
        let executor = QueryExecutor::new(dataset.clone());
        let err = executor.execute("SELECT 1; DELETE FROM t").await.unwrap_err();
        assert!(matches!(
            err,
            DatabaseError::Refused(GuardViolation::ForbiddenKeyword { .. })
        ));
        let err = executor.execute("UPDATE t SET a = 1").await.unwrap_err();
        assert_eq!(err, DatabaseError::Refused(GuardViolation::NotSelect));
        assert!(dataset.queries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn row_cap_is_passed_through() {
        let dataset = Arc::new(Recording::default());
        let table = QueryExecutor::new(dataset.clone())
            .with_max_rows(2)
            .execute("  SELECT n FROM t ")
            .await
            .unwrap();
        assert_eq!(table.row_count(), 2);
        assert_eq!(dataset.queries.lock().unwrap()[0], "SELECT n FROM t");
    }

    #[tokio::test]
    async fn slow_queries_time_out() {
        let dataset = Arc::new(Recording {
            delay: Some(Duration::from_secs(60)),
            ..Recording::default()
        });
        let err = QueryExecutor::new(dataset)
            .with_timeout(Duration::from_millis(20))
            .execute("SELECT n FROM t")
            .await
            .unwrap_err();
        assert_eq!(err, DatabaseError::Timeout(Duration::from_millis(20)));
    }
}
