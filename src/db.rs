use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{FeedbackRecord, Score};
use crate::store::FeedbackStore;

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)
        .with_context(|| format!("invalid database url {database_url}"))?
        .create_if_missing(true);

    // One connection: a single kiosk writes, and `sqlite::memory:` must not fan out.
    SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await
        .with_context(|| format!("failed to open {database_url}"))
}

/// Feedback history kept in a local SQLite file.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn init(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Result<FeedbackRecord, StoreError> {
    let raw_id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&raw_id)
        .map_err(|err| StoreError::InvalidRow(format!("id {raw_id}: {err}")))?;
    let raw_score: i64 = row.try_get("score")?;
    let score = Score::try_from(raw_score)
        .map_err(|err| StoreError::InvalidRow(format!("record {id}: {err}")))?;

    Ok(FeedbackRecord {
        id,
        professional: row.try_get("professional")?,
        score,
        comment: row.try_get("comment")?,
        submitted_at: row.try_get("submitted_at")?,
    })
}

#[async_trait]
impl FeedbackStore for SqliteStore {
    async fn load_all(&self) -> Result<Vec<FeedbackRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, professional, score, comment, submitted_at \
             FROM feedback ORDER BY seq",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(decode_row).collect()
    }

    async fn append_one(&self, record: &FeedbackRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO feedback (id, professional, score, comment, submitted_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(record.id.to_string())
        .bind(&record.professional)
        .bind(i64::from(record.score.value()))
        .bind(&record.comment)
        .bind(record.submitted_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_all(&self) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM feedback")
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

pub async fn seed(store: &impl FeedbackStore, roster: &[String]) -> anyhow::Result<usize> {
    anyhow::ensure!(!roster.is_empty(), "cannot seed without professionals");

    let samples = [
        (0usize, 10u8, "Very attentive and clear explanations.", (2026, 1, 26, 13)),
        (1, 9, "", (2026, 1, 26, 15)),
        (0, 6, "Waited almost an hour past my appointment.", (2026, 1, 28, 12)),
        (1, 8, "Good visit.", (2026, 1, 28, 17)),
        (0, 10, "", (2026, 2, 2, 11)),
        (1, 3, "Felt rushed during the consultation.", (2026, 2, 2, 14)),
    ];

    let mut records = Vec::with_capacity(samples.len());
    for (slot, score, comment, (y, m, d, h)) in samples {
        let submitted_at = Utc
            .with_ymd_and_hms(y, m, d, h, 0, 0)
            .single()
            .context("invalid seed timestamp")?;
        records.push(FeedbackRecord {
            id: Uuid::new_v4(),
            professional: roster[slot % roster.len()].clone(),
            score: Score::try_from(score)?,
            comment: comment.to_string(),
            submitted_at,
        });
    }

    append_in_order(store, records).await
}

#[derive(Debug, Serialize, Deserialize)]
struct CsvRow {
    id: Option<Uuid>,
    professional: String,
    score: u8,
    #[serde(default)]
    comment: String,
    submitted_at: DateTime<Utc>,
}

/// Appends `records` oldest first after what is already stored. Records whose
/// id is known are dropped, and so are records older than the newest stored one,
/// which keeps stored timestamps non-decreasing.
async fn append_in_order(
    store: &impl FeedbackStore,
    mut records: Vec<FeedbackRecord>,
) -> anyhow::Result<usize> {
    let stored = store
        .load_all()
        .await
        .context("failed to read existing feedback")?;
    let mut known: HashSet<Uuid> = stored.iter().map(|record| record.id).collect();
    let floor = stored.iter().map(|record| record.submitted_at).max();

    records.sort_by_key(|record| record.submitted_at);

    let mut inserted = 0usize;
    let mut too_old = 0usize;
    for record in records {
        if !known.insert(record.id) {
            tracing::debug!(id = %record.id, "skipping already imported record");
            continue;
        }
        if floor.is_some_and(|newest| record.submitted_at < newest) {
            tracing::warn!(
                id = %record.id,
                submitted_at = %record.submitted_at,
                "skipping record older than the stored history"
            );
            too_old += 1;
            continue;
        }
        store.append_one(&record).await?;
        inserted += 1;
    }

    if too_old > 0 {
        tracing::warn!(too_old, "records predating the stored history were not imported");
    }
    Ok(inserted)
}

/// Appends CSV rows in timestamp order. Rows whose id is already stored are skipped.
pub async fn import_csv(store: &impl FeedbackStore, csv_path: &Path) -> anyhow::Result<usize> {
    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut records = Vec::new();

    for (line, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = result.with_context(|| format!("bad csv row {}", line + 1))?;
        records.push(FeedbackRecord {
            id: row.id.unwrap_or_else(Uuid::new_v4),
            professional: row.professional,
            score: Score::try_from(row.score)
                .with_context(|| format!("bad score on csv row {}", line + 1))?,
            comment: row.comment,
            submitted_at: row.submitted_at,
        });
    }

    append_in_order(store, records).await
}

/// Loads a JSON array exported from the browser kiosk's local storage.
pub async fn import_json(store: &impl FeedbackStore, json_path: &Path) -> anyhow::Result<usize> {
    #[derive(Deserialize)]
    struct LegacyRecord {
        id: Option<Uuid>,
        professional: Option<String>,
        nps: Option<i64>,
        #[serde(default)]
        comment: String,
        timestamp: DateTime<Utc>,
    }

    let raw = std::fs::read_to_string(json_path)
        .with_context(|| format!("failed to read {}", json_path.display()))?;
    let legacy: Vec<LegacyRecord> =
        serde_json::from_str(&raw).context("expected a JSON array of feedback entries")?;

    let mut records = Vec::with_capacity(legacy.len());
    for (index, entry) in legacy.into_iter().enumerate() {
        let Some(professional) = entry.professional else {
            tracing::warn!(index, "skipping entry without a professional");
            continue;
        };
        let score = match entry.nps {
            Some(value) => Score::try_from(value)
                .with_context(|| format!("bad score on entry {index}"))?,
            None => {
                tracing::warn!(index, "entry has no score, counting it as 0");
                Score::MIN
            }
        };
        records.push(FeedbackRecord {
            id: entry.id.unwrap_or_else(Uuid::new_v4),
            professional,
            score,
            comment: entry.comment,
            submitted_at: entry.timestamp,
        });
    }

    append_in_order(store, records).await
}

pub fn export_csv(records: &[&FeedbackRecord], csv_path: &Path) -> anyhow::Result<usize> {
    let mut writer = csv::Writer::from_path(csv_path)
        .with_context(|| format!("failed to create {}", csv_path.display()))?;

    for record in records {
        writer.serialize(CsvRow {
            id: Some(record.id),
            professional: record.professional.clone(),
            score: record.score.value(),
            comment: record.comment.clone(),
            submitted_at: record.submitted_at,
        })?;
    }
    writer.flush()?;

    Ok(records.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    async fn memory_store() -> SqliteStore {
        let pool = connect("sqlite::memory:").await.expect("in-memory pool");
        let store = SqliteStore::new(pool);
        store.init().await.expect("migrations");
        store
    }

    fn roster() -> Vec<String> {
        vec!["Dr. Elvy Soares".to_string(), "Dr. Julio Cesar".to_string()]
    }

    #[tokio::test]
    async fn sqlite_store_preserves_order_and_fields() {
        let store = memory_store().await;
        seed(&store, &roster()).await.unwrap();

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 6);
        assert_eq!(loaded[0].professional, "Dr. Elvy Soares");
        assert_eq!(loaded[0].score.value(), 10);
        assert_eq!(loaded[1].comment, "");
        assert!(loaded
            .windows(2)
            .all(|pair| pair[0].submitted_at <= pair[1].submitted_at));
    }

    #[tokio::test]
    async fn sqlite_clear_removes_everything() {
        let store = memory_store().await;
        seed(&store, &roster()).await.unwrap();
        store.clear_all().await.unwrap();
        assert!(store.load_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn csv_export_then_import_skips_known_ids() {
        let source = MemoryStore::new();
        seed(&source, &roster()).await.unwrap();
        let records = source.load_all().await.unwrap();
        let refs: Vec<&FeedbackRecord> = records.iter().collect();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feedback.csv");
        assert_eq!(export_csv(&refs, &path).unwrap(), 6);

        let target = memory_store().await;
        assert_eq!(import_csv(&target, &path).await.unwrap(), 6);
        assert_eq!(import_csv(&target, &path).await.unwrap(), 0);
        assert_eq!(target.load_all().await.unwrap(), records);
    }

    #[tokio::test]
    async fn browser_dump_import_handles_missing_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(
            &path,
            r#"[
                {"professional":"Dr. Julio Cesar","nps":9,"comment":"","timestamp":"2024-01-20T10:00:00.000Z"},
                {"professional":null,"nps":4,"comment":"","timestamp":"2024-01-20T11:00:00.000Z"},
                {"professional":"Dr. Elvy Soares","nps":null,"comment":"ok","timestamp":"2024-01-21T10:00:00.000Z"}
            ]"#,
        )
        .unwrap();

        let store = MemoryStore::new();
        assert_eq!(import_json(&store, &path).await.unwrap(), 2);

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].score.value(), 9);
        assert_eq!(loaded[1].professional, "Dr. Elvy Soares");
        assert_eq!(loaded[1].score, Score::MIN);
    }

    #[tokio::test]
    async fn import_sorts_rows_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(
            &path,
            r#"[
                {"professional":"Dr. Julio Cesar","nps":7,"timestamp":"2024-01-22T10:00:00.000Z"},
                {"professional":"Dr. Elvy Soares","nps":10,"timestamp":"2024-01-20T10:00:00.000Z"}
            ]"#,
        )
        .unwrap();

        let store = memory_store().await;
        assert_eq!(import_json(&store, &path).await.unwrap(), 2);

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded[0].professional, "Dr. Elvy Soares");
        assert_eq!(loaded[1].professional, "Dr. Julio Cesar");
    }

    #[tokio::test]
    async fn import_skips_rows_older_than_stored_history() {
        let live = FeedbackRecord {
            id: Uuid::new_v4(),
            professional: "Dr. Elvy Soares".to_string(),
            score: Score::MAX,
            comment: "live".to_string(),
            submitted_at: Utc.with_ymd_and_hms(2026, 2, 1, 12, 0, 0).unwrap(),
        };
        let store = MemoryStore::with_records(vec![live.clone()]);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        std::fs::write(
            &path,
            r#"[
                {"professional":"Dr. Julio Cesar","nps":3,"comment":"old","timestamp":"2024-01-20T10:00:00.000Z"},
                {"professional":"Dr. Julio Cesar","nps":9,"comment":"new","timestamp":"2026-02-03T10:00:00.000Z"}
            ]"#,
        )
        .unwrap();

        assert_eq!(import_json(&store, &path).await.unwrap(), 1);

        let loaded = store.load_all().await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0], live);
        assert_eq!(loaded[1].comment, "new");
        assert!(loaded
            .windows(2)
            .all(|pair| pair[0].submitted_at <= pair[1].submitted_at));
    }
}
