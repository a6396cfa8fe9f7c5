//! SQLite storage implementation.
//!
//! The production backend: the ledger must survive restarts, and the query
//! surface filters in SQL rather than in memory. Each record row keeps its
//! full [`Decision`] as JSON next to the indexed columns used for filtering.

use async_trait::async_trait;
use chrono::{NaiveDate, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::str::FromStr;

use crate::error::{StoreError, StoreResult, UpstreamError, UpstreamResult};
use crate::traits::store::{DedupLedger, RecordQuery, RecordStore};
use crate::types::{
    decision::{Decision, Destination},
    message::ProcessedKey,
    query::{DashboardStats, PageRequest, RecordFilter, RecordPage, SourceCount},
};

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(Box::new(e))
}

fn table_name(destination: Destination) -> &'static str {
    match destination {
        Destination::Relevant => "relevant_jobs",
        Destination::Uncategorized => "uncategorized",
    }
}

/// SQLite-based ledger and record store.
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a new SQLite store with the given connection URL.
    ///
    /// # Example URLs
    /// - `sqlite://job_scout.db?mode=rwc` - File-based, created if missing
    /// - `sqlite::memory:` - In-memory database (prefer [`Self::in_memory`])
    pub async fn new(database_url: &str) -> StoreResult<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(backend)?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Create an in-memory SQLite store (for testing).
    ///
    /// Every pooled connection to `:memory:` would see its own database, so
    /// the pool is pinned to a single connection that never expires.
    pub async fn in_memory() -> StoreResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(backend)?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    /// Run database migrations.
    async fn run_migrations(&self) -> StoreResult<()> {
        for table in [table_name(Destination::Relevant), table_name(Destination::Uncategorized)] {
            let ddl = format!(
                r#"
                CREATE TABLE IF NOT EXISTS {table} (
                    channel_id TEXT NOT NULL,
                    message_id INTEGER NOT NULL,
                    source TEXT NOT NULL,
                    posted_at TEXT NOT NULL,
                    posted_on TEXT NOT NULL,
                    text TEXT NOT NULL,
                    text_folded TEXT NOT NULL,
                    source_folded TEXT NOT NULL,
                    record TEXT NOT NULL,
                    written_at TEXT NOT NULL,
                    PRIMARY KEY (channel_id, message_id)
                );

                CREATE INDEX IF NOT EXISTS idx_{table}_posted_at ON {table}(posted_at);
                CREATE INDEX IF NOT EXISTS idx_{table}_source ON {table}(source);
                "#
            );
            sqlx::query(&ddl)
                .execute(&self.pool)
                .await
                .map_err(backend)?;
        }

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS processed_keys (
                channel_id TEXT NOT NULL,
                message_id INTEGER NOT NULL,
                processed_at TEXT NOT NULL,
                PRIMARY KEY (channel_id, message_id)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        Ok(())
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[derive(Debug, FromRow)]
struct RecordRow {
    channel_id: String,
    message_id: i64,
    record: String,
}

impl RecordRow {
    fn into_decision(self) -> StoreResult<Decision> {
        serde_json::from_str(&self.record).map_err(|e| StoreError::Corrupt {
            key: format!("{}:{}", self.channel_id, self.message_id),
            reason: e.to_string(),
        })
    }
}

/// `WHERE` clause and its bind values for a filter (same for both tables).
fn filter_clause(filter: &RecordFilter) -> (String, Vec<String>) {
    let mut conditions: Vec<String> = Vec::new();
    let mut binds: Vec<String> = Vec::new();

    if !filter.sources.is_empty() {
        let placeholders = filter.sources.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        conditions.push(format!("source IN ({})", placeholders));
        binds.extend(filter.sources.iter().cloned());
    }
    if let Some(from) = filter.from {
        conditions.push("posted_on >= ?".to_string());
        binds.push(from.to_string());
    }
    if let Some(to) = filter.to {
        conditions.push("posted_on <= ?".to_string());
        binds.push(to.to_string());
    }
    if let Some(search) = &filter.search {
        let pattern = like_pattern(search);
        conditions.push(
            "(text_folded LIKE ? ESCAPE '\\' OR source_folded LIKE ? ESCAPE '\\')".to_string(),
        );
        binds.push(pattern.clone());
        binds.push(pattern);
    }

    let clause = if conditions.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", conditions.join(" AND "))
    };
    (clause, binds)
}

/// Substring pattern for `LIKE ... ESCAPE '\'`. The term is lowercased the
/// same way as the `*_folded` columns; wildcards in it match literally.
fn like_pattern(search: &str) -> String {
    let mut pattern = String::from("%");
    for c in search.to_lowercase().chars() {
        if matches!(c, '\\' | '%' | '_') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

/// `UNION ALL` over the destinations the filter selects.
fn union_over(filter: &RecordFilter, columns: &str) -> (String, Vec<String>) {
    let (clause, binds) = filter_clause(filter);
    let destinations = filter.category.destinations();

    let sql = destinations
        .iter()
        .map(|d| format!("SELECT {} FROM {}{}", columns, table_name(*d), clause))
        .collect::<Vec<_>>()
        .join(" UNION ALL ");
    let binds = destinations.iter().flat_map(|_| binds.iter().cloned()).collect();
    (sql, binds)
}

/// Same `SELECT` over both tables.
fn union_all(columns: &str, tail: &str) -> String {
    Destination::ALL
        .iter()
        .map(|d| format!("SELECT {} FROM {}{}", columns, table_name(*d), tail))
        .collect::<Vec<_>>()
        .join(" UNION ALL ")
}

#[async_trait]
impl DedupLedger for SqliteStore {
    async fn seen(&self, key: &ProcessedKey) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM processed_keys WHERE channel_id = ? AND message_id = ?",
        )
        .bind(key.channel.as_str())
        .bind(key.message_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        Ok(found.is_some())
    }

    async fn mark(&self, key: &ProcessedKey) -> StoreResult<()> {
        self.mark_all(std::slice::from_ref(key)).await
    }

    async fn mark_all(&self, keys: &[ProcessedKey]) -> StoreResult<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for key in keys {
            sqlx::query(
                "INSERT OR IGNORE INTO processed_keys (channel_id, message_id, processed_at) VALUES (?, ?, ?)",
            )
            .bind(key.channel.as_str())
            .bind(key.message_id.0)
            .bind(&now)
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)
    }

    async fn len(&self) -> StoreResult<usize> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM processed_keys")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;
        Ok(count as usize)
    }
}

/// Busy/locked databases are transient; everything else is a transport error.
fn upstream(e: sqlx::Error) -> UpstreamError {
    let busy = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "5" || code == "6");
    if busy {
        UpstreamError::Throttled { retry_after: None }
    } else {
        UpstreamError::Transport(Box::new(e))
    }
}

#[async_trait]
impl RecordStore for SqliteStore {
    async fn append_rows(&self, destination: Destination, rows: &[Decision]) -> UpstreamResult<()> {
        let sql = format!(
            r#"
            INSERT OR REPLACE INTO {} (channel_id, message_id, source, posted_at, posted_on, text, text_folded, source_folded, record, written_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            table_name(destination)
        );
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await.map_err(upstream)?;

        for row in rows {
            let meta = row.meta();
            let record = serde_json::to_string(row).map_err(|e| UpstreamError::Malformed(e.to_string()))?;

            sqlx::query(&sql)
                .bind(meta.key.channel.as_str())
                .bind(meta.key.message_id.0)
                .bind(&meta.source)
                .bind(meta.posted_at.to_rfc3339_opts(SecondsFormat::Micros, true))
                .bind(meta.posted_on().to_string())
                .bind(row.text())
                .bind(row.text().to_lowercase())
                .bind(meta.source.to_lowercase())
                .bind(record)
                .bind(&now)
                .execute(&mut *tx)
                .await
                .map_err(upstream)?;
        }

        tx.commit().await.map_err(upstream)
    }
}

#[async_trait]
impl RecordQuery for SqliteStore {
    async fn list(&self, filter: &RecordFilter, page: PageRequest) -> StoreResult<RecordPage> {
        let (union, binds) = union_over(filter, "channel_id, message_id, posted_at, record");

        let count_sql = format!("SELECT COUNT(*) FROM ({})", union);
        let mut count_query = sqlx::query_scalar::<_, i64>(&count_sql);
        for value in &binds {
            count_query = count_query.bind(value);
        }
        let total = count_query.fetch_one(&self.pool).await.map_err(backend)? as usize;

        let page_sql = format!(
            "SELECT channel_id, message_id, record FROM ({}) ORDER BY posted_at DESC, channel_id ASC, message_id ASC LIMIT ? OFFSET ?",
            union
        );
        let mut page_query = sqlx::query_as::<_, RecordRow>(&page_sql);
        for value in &binds {
            page_query = page_query.bind(value);
        }
        let rows = page_query
            .bind(i64::try_from(page.per_page).unwrap_or(i64::MAX))
            .bind(i64::try_from(page.offset()).unwrap_or(i64::MAX))
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let records = rows
            .into_iter()
            .map(RecordRow::into_decision)
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(RecordPage::new(records, total, page))
    }

    async fn stats(&self, today: NaiveDate) -> StoreResult<DashboardStats> {
        let count = |table: &'static str| {
            let pool = &self.pool;
            async move {
                sqlx::query_scalar::<_, i64>(&format!("SELECT COUNT(*) FROM {}", table))
                    .fetch_one(pool)
                    .await
                    .map(|n| n as usize)
                    .map_err(backend)
            }
        };
        let relevant = count(table_name(Destination::Relevant)).await?;
        let uncategorized = count(table_name(Destination::Uncategorized)).await?;

        let today_sql = format!(
            "SELECT COUNT(*) FROM ({})",
            union_all("posted_on", " WHERE posted_on = ?")
        );
        let today_count: i64 = sqlx::query_scalar(&today_sql)
            .bind(today.to_string())
            .bind(today.to_string())
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        let top_sql = format!(
            "SELECT source, COUNT(*) AS n FROM ({}) GROUP BY source ORDER BY n DESC, source ASC LIMIT 5",
            union_all("source", "")
        );
        let top: Vec<(String, i64)> = sqlx::query_as(&top_sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let dates_sql = format!(
            "SELECT posted_on, COUNT(*) AS n FROM ({}) GROUP BY posted_on ORDER BY posted_on DESC LIMIT 7",
            union_all("posted_on", "")
        );
        let dates: Vec<(String, i64)> = sqlx::query_as(&dates_sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        let recent_dates = dates
            .into_iter()
            .map(|(day, n)| {
                NaiveDate::from_str(&day)
                    .map(|d| (d, n as usize))
                    .map_err(|e| StoreError::Corrupt {
                        key: day.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<StoreResult<Vec<_>>>()?;

        Ok(DashboardStats {
            total: relevant + uncategorized,
            relevant,
            uncategorized,
            today: today_count as usize,
            top_sources: top
                .into_iter()
                .map(|(name, n)| SourceCount {
                    name,
                    count: n as usize,
                })
                .collect(),
            recent_dates,
        })
    }

    async fn sources(&self) -> StoreResult<Vec<SourceCount>> {
        let sql = format!(
            "SELECT source, COUNT(*) AS n FROM ({}) GROUP BY source ORDER BY source ASC",
            union_all("source", "")
        );
        let rows: Vec<(String, i64)> = sqlx::query_as(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(backend)?;

        Ok(rows
            .into_iter()
            .map(|(name, n)| SourceCount {
                name,
                count: n as usize,
            })
            .collect())
    }

    async fn get(&self, key: &ProcessedKey) -> StoreResult<Option<Decision>> {
        for destination in Destination::ALL {
            let sql = format!(
                "SELECT channel_id, message_id, record FROM {} WHERE channel_id = ? AND message_id = ?",
                table_name(destination)
            );
            let row = sqlx::query_as::<_, RecordRow>(&sql)
                .bind(key.channel.as_str())
                .bind(key.message_id.0)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;

            if let Some(row) = row {
                return row.into_decision().map(Some);
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{relevant_decision, uncategorized_decision};
    use crate::types::query::CategoryFilter;

    async fn test_store() -> SqliteStore {
        SqliteStore::in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_ledger_storage() {
        let store = test_store().await;
        let key = ProcessedKey::new("42", 777);

        assert!(!store.seen(&key).await.unwrap());
        store.mark(&key).await.unwrap();
        store.mark(&key).await.unwrap();

        assert!(store.seen(&key).await.unwrap());
        assert!(!store.seen(&ProcessedKey::new("42", 778)).await.unwrap());
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_append_and_get() {
        let store = test_store().await;
        let decision = relevant_decision("42", 1);

        store
            .append_rows(Destination::Relevant, std::slice::from_ref(&decision))
            .await
            .unwrap();

        let found = store.get(&ProcessedKey::new("42", 1)).await.unwrap();
        assert_eq!(found, Some(decision));
        assert!(store.get(&ProcessedKey::new("42", 2)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_in_sql() {
        let store = test_store().await;
        store
            .append_rows(
                Destination::Relevant,
                &[relevant_decision("ocean", 1), relevant_decision("interns", 2)],
            )
            .await
            .unwrap();
        store
            .append_rows(Destination::Uncategorized, &[uncategorized_decision("ocean", 3)])
            .await
            .unwrap();

        let all = store
            .list(&RecordFilter::new(), PageRequest::new(1, 2))
            .await
            .unwrap();
        assert_eq!(all.total, 3);
        assert_eq!(all.records.len(), 2);
        assert_eq!(all.total_pages, 2);

        let ocean_relevant = store
            .list(
                &RecordFilter::new()
                    .with_category(CategoryFilter::Relevant)
                    .with_sources_csv("ocean"),
                PageRequest::default(),
            )
            .await
            .unwrap();
        assert_eq!(ocean_relevant.total, 1);
        assert_eq!(ocean_relevant.records[0].key(), &ProcessedKey::new("ocean", 1));

        let searched = store
            .list(&RecordFilter::new().with_search("INTERNS"), PageRequest::default())
            .await
            .unwrap();
        assert_eq!(searched.total, 1);
    }

    #[tokio::test]
    async fn test_search_matches_wildcards_literally() {
        let store = test_store().await;
        let with_text = |channel: &str, id: i64, text: &str| {
            let mut decision = relevant_decision(channel, id);
            if let Decision::Relevant(record) = &mut decision {
                record.text = text.to_string();
            }
            decision
        };
        store
            .append_rows(
                Destination::Relevant,
                &[
                    with_text("alpha", 1, "Stipend hike of 100% for SDE_1 interns"),
                    with_text("beta", 2, "Stipend hike of 100 percent for SDE-1 interns"),
                    with_text("gamma", 3, "ÉCOLE Polytechnique hiring trainees"),
                ],
            )
            .await
            .unwrap();

        let store = &store;
        let search = move |term: &str| {
            let filter = RecordFilter::new().with_search(term);
            async move { store.list(&filter, PageRequest::default()).await.unwrap().total }
        };

        assert_eq!(search("100%").await, 1);
        assert_eq!(search("sde_1").await, 1);
        assert_eq!(search("%").await, 1);
        assert_eq!(search("école").await, 1);
        assert_eq!(search("interns").await, 2);
    }

    #[tokio::test]
    async fn test_list_with_extreme_page_is_empty() {
        let store = test_store().await;
        store
            .append_rows(Destination::Relevant, &[relevant_decision("ocean", 1)])
            .await
            .unwrap();

        let page = store
            .list(&RecordFilter::new(), PageRequest::new(usize::MAX, usize::MAX))
            .await
            .unwrap();
        assert_eq!(page.total, 1);
        assert!(page.records.is_empty());
    }

    #[tokio::test]
    async fn test_stats_and_sources() {
        let store = test_store().await;
        store
            .append_rows(
                Destination::Relevant,
                &[relevant_decision("a", 1), relevant_decision("b", 2)],
            )
            .await
            .unwrap();
        store
            .append_rows(Destination::Uncategorized, &[uncategorized_decision("a", 3)])
            .await
            .unwrap();

        let today = Utc::now().date_naive();
        let stats = store.stats(today).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.relevant, 2);
        assert_eq!(stats.uncategorized, 1);
        assert_eq!(stats.today, 3);
        assert_eq!(stats.top_sources[0], SourceCount { name: "a".into(), count: 2 });
        assert_eq!(stats.recent_dates, vec![(today, 3)]);

        let sources = store.sources().await.unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].name, "a");
    }

    #[tokio::test]
    async fn test_file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite://{}", dir.path().join("ledger.db").display());
        let key = ProcessedKey::new("42", 777);

        {
            let store = SqliteStore::new(&url).await.unwrap();
            store.mark(&key).await.unwrap();
            store.pool().close().await;
        }

        let reopened = SqliteStore::new(&url).await.unwrap();
        assert!(reopened.seen(&key).await.unwrap());
    }
}
