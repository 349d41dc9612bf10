//! SQLite history store (feature-gated).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::DateTime;
use shellgate_core::{
    CommandResult, HistoryEntry, HistoryError, HistoryFilter, HistoryId, HistoryStatistics,
    HistoryStore, traits::CommandCount,
};
use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow},
};

const SELECT_ENTRY: &str = "SELECT id, command, exit_code, stdout, stderr, timestamp_ms, \
     working_directory, user, duration_ms FROM command_history";

/// SQLite-backed history.
pub struct SqliteHistory {
    pool: SqlitePool,
}

fn internal(e: impl std::fmt::Display) -> HistoryError {
    HistoryError::Internal(e.to_string())
}

impl SqliteHistory {
    /// Open (creating if needed) a database file.
    ///
    /// # Errors
    /// Returns error if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, HistoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(internal)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        Self::with_pool(pool).await
    }

    /// Open a private in-memory database.
    ///
    /// # Errors
    /// Returns error if the database cannot be created.
    pub async fn in_memory() -> Result<Self, HistoryError> {
        // Every in-memory connection is its own database, so keep exactly one.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| HistoryError::Unavailable(e.to_string()))?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, HistoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS command_history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                command TEXT NOT NULL,
                exit_code INTEGER NOT NULL,
                stdout TEXT NOT NULL,
                stderr TEXT NOT NULL,
                timestamp_ms INTEGER NOT NULL,
                working_directory TEXT NOT NULL,
                user TEXT NOT NULL,
                duration_ms INTEGER NOT NULL
            )",
        )
        .execute(&pool)
        .await
        .map_err(internal)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_command_history_timestamp
             ON command_history (timestamp_ms DESC)",
        )
        .execute(&pool)
        .await
        .map_err(internal)?;

        Ok(Self { pool })
    }
}

fn row_to_entry(row: &SqliteRow) -> Result<HistoryEntry, HistoryError> {
    let timestamp_ms: i64 = row.try_get("timestamp_ms").map_err(internal)?;
    let timestamp = DateTime::from_timestamp_millis(timestamp_ms)
        .ok_or_else(|| internal(format!("timestamp out of range: {timestamp_ms}")))?;
    let working_directory: String = row.try_get("working_directory").map_err(internal)?;
    let duration_ms: i64 = row.try_get("duration_ms").map_err(internal)?;

    Ok(HistoryEntry {
        id: row.try_get("id").map_err(internal)?,
        result: CommandResult {
            command: row.try_get("command").map_err(internal)?,
            exit_code: row.try_get("exit_code").map_err(internal)?,
            stdout: row.try_get("stdout").map_err(internal)?,
            stderr: row.try_get("stderr").map_err(internal)?,
            timestamp,
            working_directory: PathBuf::from(working_directory),
            user: row.try_get("user").map_err(internal)?,
            duration_ms: u64::try_from(duration_ms).unwrap_or_default(),
        },
    })
}

fn to_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

#[async_trait]
impl HistoryStore for SqliteHistory {
    async fn add_entry(&self, result: &CommandResult) -> Result<HistoryId, HistoryError> {
        let inserted = sqlx::query(
            "INSERT INTO command_history
             (command, exit_code, stdout, stderr, timestamp_ms, working_directory, user, duration_ms)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&result.command)
        .bind(result.exit_code)
        .bind(&result.stdout)
        .bind(&result.stderr)
        .bind(result.timestamp.timestamp_millis())
        .bind(result.working_directory.to_string_lossy().into_owned())
        .bind(&result.user)
        .bind(i64::try_from(result.duration_ms).unwrap_or(i64::MAX))
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(inserted.last_insert_rowid())
    }

    async fn search(&self, filter: &HistoryFilter) -> Result<Vec<HistoryEntry>, HistoryError> {
        let mut query = QueryBuilder::<Sqlite>::new(SELECT_ENTRY);
        query.push(" WHERE 1 = 1");

        if let Some(keyword) = &filter.keyword {
            query
                .push(" AND instr(command, ")
                .push_bind(keyword.clone())
                .push(") > 0");
        }
        if let Some(since) = filter.since {
            query
                .push(" AND timestamp_ms >= ")
                .push_bind(since.timestamp_millis());
        }
        if let Some(until) = filter.until {
            query
                .push(" AND timestamp_ms <= ")
                .push_bind(until.timestamp_millis());
        }
        if let Some(exit_code) = filter.exit_code {
            query.push(" AND exit_code = ").push_bind(exit_code);
        }
        if let Some(user) = &filter.user {
            query.push(" AND user = ").push_bind(user.clone());
        }

        query
            .push(" ORDER BY timestamp_ms DESC, id DESC LIMIT ")
            .push_bind(to_i64(filter.effective_limit()))
            .push(" OFFSET ")
            .push_bind(to_i64(filter.effective_offset()));

        let rows = query.build().fetch_all(&self.pool).await.map_err(internal)?;
        rows.iter().map(row_to_entry).collect()
    }

    async fn last_entry(&self) -> Result<Option<HistoryEntry>, HistoryError> {
        let row = sqlx::query(&format!("{SELECT_ENTRY} ORDER BY id DESC LIMIT 1"))
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
        row.as_ref().map(row_to_entry).transpose()
    }

    async fn statistics(&self, top: usize) -> Result<HistoryStatistics, HistoryError> {
        let totals = sqlx::query(
            "SELECT COUNT(*) AS total,
                    COALESCE(SUM(CASE WHEN exit_code = 0 THEN 1 ELSE 0 END), 0) AS successful
             FROM command_history",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(internal)?;

        let total: i64 = totals.try_get("total").map_err(internal)?;
        let successful: i64 = totals.try_get("successful").map_err(internal)?;

        let rows = sqlx::query(
            "SELECT command, COUNT(*) AS count FROM command_history
             GROUP BY command ORDER BY count DESC, command ASC LIMIT ?1",
        )
        .bind(to_i64(top))
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        let top_commands = rows
            .iter()
            .map(|row| {
                let count: i64 = row.try_get("count").map_err(internal)?;
                Ok(CommandCount {
                    command: row.try_get("command").map_err(internal)?,
                    count: u64::try_from(count).unwrap_or_default(),
                })
            })
            .collect::<Result<Vec<_>, HistoryError>>()?;

        let total = u64::try_from(total).unwrap_or_default();
        let successful = u64::try_from(successful).unwrap_or_default();
        Ok(HistoryStatistics {
            total,
            successful,
            failed: total.saturating_sub(successful),
            top_commands,
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;

    fn result(command: &str, exit_code: i32, minutes_ago: i64) -> CommandResult {
        CommandResult {
            command: command.to_string(),
            exit_code,
            stdout: "out".to_string(),
            stderr: String::new(),
            timestamp: Utc::now() - Duration::minutes(minutes_ago),
            working_directory: PathBuf::from("/srv"),
            user: "alice".to_string(),
            duration_ms: 12,
        }
    }

    #[tokio::test]
    async fn test_round_trip_fields() {
        let store = SqliteHistory::in_memory().await.unwrap();
        let id = store.add_entry(&result("make test", 2, 1)).await.unwrap();

        let last = store.last_entry().await.unwrap().unwrap();
        assert_eq!(last.id, id);
        assert_eq!(last.result.command, "make test");
        assert_eq!(last.result.exit_code, 2);
        assert_eq!(last.result.working_directory, PathBuf::from("/srv"));
        assert_eq!(last.result.duration_ms, 12);
    }

    #[tokio::test]
    async fn test_keyword_search_and_statistics() {
        let store = SqliteHistory::in_memory().await.unwrap();
        for (command, code, ago) in [("cargo build", 0, 30), ("ls", 0, 20), ("cargo test", 1, 10)] {
            store.add_entry(&result(command, code, ago)).await.unwrap();
        }

        let found = store.search(&HistoryFilter::keyword("cargo")).await.unwrap();
        let commands: Vec<&str> = found.iter().map(|e| e.result.command.as_str()).collect();
        assert_eq!(commands, vec!["cargo test", "cargo build"]);

        let stats = store.statistics(10).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.successful, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.top_commands.len(), 3);
    }

    #[tokio::test]
    async fn test_open_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("history.db");
        let store = SqliteHistory::open(&path).await.unwrap();
        store.add_entry(&result("pwd", 0, 0)).await.unwrap();
        assert!(path.exists());
    }
}
