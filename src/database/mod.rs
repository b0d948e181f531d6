//! Durable caption store
//!
//! The engine talks to the system of record through the `CaptionStore`
//! adapter; the SQLite implementation below is the default. No SQL
//! leaks past this module.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{migrate::MigrateDatabase, Pool, Sqlite, SqlitePool};
use uuid::Uuid;

use crate::config::DatabaseConfig;
use crate::models::{MeetingStatus, Subtitle};

/// Row-oriented adapter over the durable store.
#[async_trait]
pub trait CaptionStore: Send + Sync {
    /// Bulk-inserts finalized captions for a meeting.
    async fn insert_subtitles(&self, subtitles: &[Subtitle]) -> Result<(), sqlx::Error>;

    /// Updates a meeting's lifecycle status, optionally recording the
    /// asset duration reported by the ASR provider.
    async fn update_meeting_status(
        &self,
        meeting_id: Uuid,
        status: MeetingStatus,
        duration_seconds: Option<f64>,
    ) -> Result<(), sqlx::Error>;
}

#[derive(Clone)]
pub struct Database {
    pool: Pool<Sqlite>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        if !Sqlite::database_exists(&config.url).await.unwrap_or(false) {
            Sqlite::create_database(&config.url).await?;
        }
        let pool = SqlitePool::connect(&config.url).await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS subtitles (
                id TEXT PRIMARY KEY,
                room_id TEXT NOT NULL,
                text TEXT NOT NULL,
                start_time_sec REAL NOT NULL,
                end_time_sec REAL NOT NULL,
                confidence REAL NOT NULL,
                speaker_label TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_subtitles_room_start
            ON subtitles (room_id, start_time_sec)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS meetings (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL,
                duration_seconds REAL,
                updated_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl CaptionStore for Database {
    async fn insert_subtitles(&self, subtitles: &[Subtitle]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for subtitle in subtitles {
            sqlx::query(
                r#"
                INSERT INTO subtitles
                    (id, room_id, text, start_time_sec, end_time_sec,
                     confidence, speaker_label, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(subtitle.id.to_string())
            .bind(&subtitle.room_id)
            .bind(&subtitle.text)
            .bind(subtitle.start_time_sec)
            .bind(subtitle.end_time_sec)
            .bind(subtitle.confidence)
            .bind(&subtitle.speaker_label)
            .bind(subtitle.created_at.to_rfc3339())
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await
    }

    async fn update_meeting_status(
        &self,
        meeting_id: Uuid,
        status: MeetingStatus,
        duration_seconds: Option<f64>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO meetings (id, status, duration_seconds, updated_at)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                duration_seconds = COALESCE(excluded.duration_seconds, meetings.duration_seconds),
                updated_at = excluded.updated_at
            "#,
        )
        .bind(meeting_id.to_string())
        .bind(status.as_str())
        .bind(duration_seconds)
        .bind(chrono::Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    async fn memory_db() -> Database {
        let db = Database {
            pool: SqlitePool::connect("sqlite::memory:").await.unwrap(),
        };
        db.migrate().await.unwrap();
        db
    }

    fn subtitle(room: &str, text: &str, start: f64) -> Subtitle {
        Subtitle {
            id: Uuid::new_v4(),
            room_id: room.to_string(),
            text: text.to_string(),
            start_time_sec: start,
            end_time_sec: start + 3.0,
            confidence: 0.88,
            speaker_label: Some("Speaker 1".to_string()),
            created_at: Utc::now(),
            original_text: None,
        }
    }

    #[tokio::test]
    async fn bulk_insert_persists_all_rows_in_order() {
        let db = memory_db().await;
        let meeting = Uuid::new_v4().to_string();
        let subtitles = vec![
            subtitle(&meeting, "첫 번째 자막", 0.0),
            subtitle(&meeting, "두 번째 자막", 4.0),
            subtitle(&meeting, "세 번째 자막", 9.0),
        ];
        db.insert_subtitles(&subtitles).await.unwrap();

        let rows: Vec<(String, f64)> = sqlx::query_as(
            "SELECT text, start_time_sec FROM subtitles WHERE room_id = ? ORDER BY start_time_sec",
        )
        .bind(&meeting)
        .fetch_all(db.pool())
        .await
        .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].0, "첫 번째 자막");
        assert_eq!(rows[2].1, 9.0);
    }

    #[tokio::test]
    async fn meeting_status_upserts_and_keeps_duration() {
        let db = memory_db().await;
        let meeting_id = Uuid::new_v4();

        db.update_meeting_status(meeting_id, MeetingStatus::Processing, None)
            .await
            .unwrap();
        db.update_meeting_status(meeting_id, MeetingStatus::Ended, Some(3671.2))
            .await
            .unwrap();
        // A later status-only update must not erase the stored duration.
        db.update_meeting_status(meeting_id, MeetingStatus::Ended, None)
            .await
            .unwrap();

        let row: (String, Option<f64>) =
            sqlx::query_as("SELECT status, duration_seconds FROM meetings WHERE id = ?")
                .bind(meeting_id.to_string())
                .fetch_one(db.pool())
                .await
                .unwrap();
        assert_eq!(row.0, "ended");
        assert_eq!(row.1, Some(3671.2));
    }
}
