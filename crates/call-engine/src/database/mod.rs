//! Interaction store (sqlx + SQLite).
//!
//! One row per call, written fire-and-forget when the call finalizes.
//! The schema is ensured at startup so a fresh deployment needs no
//! migration step.

use chrono::Utc;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::Result;

/// The outcome row persisted for every call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionRecord {
    pub unique_id: String,
    pub caller_id: String,
    pub text_to_synthesize: Option<String>,
    pub synthesized_audio_path: Option<String>,
    pub stt_audio_path: Option<String>,
    /// One of VOICE, DTMF, NO_INPUT, TIMEOUT, ERROR
    pub recognition_mode: String,
    pub transcript: Option<String>,
    pub keypad_digits: Option<String>,
}

/// Async database manager for the interaction store.
#[derive(Clone)]
pub struct DatabaseManager {
    pool: SqlitePool,
}

impl DatabaseManager {
    /// Connect and ensure the schema exists.
    pub async fn new(database_url: &str) -> Result<Self> {
        info!(url = database_url, "initializing interaction store");
        // A single connection keeps in-memory databases coherent and is
        // plenty for one insert per call.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS interactions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                unique_id TEXT NOT NULL,
                caller_id TEXT NOT NULL,
                text_to_synthesize TEXT,
                synthesized_audio_path TEXT,
                stt_audio_path TEXT,
                recognition_mode TEXT NOT NULL,
                transcript TEXT,
                keypad_digits TEXT,
                created_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    /// Insert one interaction row.
    pub async fn record_interaction(&self, record: &InteractionRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO interactions (
                unique_id, caller_id, text_to_synthesize, synthesized_audio_path,
                stt_audio_path, recognition_mode, transcript, keypad_digits, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&record.unique_id)
        .bind(&record.caller_id)
        .bind(&record.text_to_synthesize)
        .bind(&record.synthesized_audio_path)
        .bind(&record.stt_audio_path)
        .bind(&record.recognition_mode)
        .bind(&record.transcript)
        .bind(&record.keypad_digits)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        debug!(unique_id = %record.unique_id, mode = %record.recognition_mode, "interaction recorded");
        Ok(())
    }

    /// Fetch the rows for one call, newest first. Used by tests and
    /// operational tooling.
    pub async fn interactions_for(&self, unique_id: &str) -> Result<Vec<InteractionRecord>> {
        use sqlx::Row;
        let rows = sqlx::query(
            r#"
            SELECT unique_id, caller_id, text_to_synthesize, synthesized_audio_path,
                   stt_audio_path, recognition_mode, transcript, keypad_digits
            FROM interactions WHERE unique_id = ? ORDER BY id DESC
            "#,
        )
        .bind(unique_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InteractionRecord {
                unique_id: row.get("unique_id"),
                caller_id: row.get("caller_id"),
                text_to_synthesize: row.get("text_to_synthesize"),
                synthesized_audio_path: row.get("synthesized_audio_path"),
                stt_audio_path: row.get("stt_audio_path"),
                recognition_mode: row.get("recognition_mode"),
                transcript: row.get("transcript"),
                keypad_digits: row.get("keypad_digits"),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(mode: &str) -> InteractionRecord {
        InteractionRecord {
            unique_id: "chan-1".into(),
            caller_id: "600123456".into(),
            text_to_synthesize: Some("hola".into()),
            synthesized_audio_path: Some("/rec/tts.wav".into()),
            stt_audio_path: Some("/rec/stt.wav".into()),
            recognition_mode: mode.into(),
            transcript: Some("buenos días".into()),
            keypad_digits: None,
        }
    }

    #[tokio::test]
    async fn test_schema_and_round_trip() {
        let db = DatabaseManager::new("sqlite::memory:").await.unwrap();
        db.record_interaction(&sample("VOICE")).await.unwrap();

        let rows = db.interactions_for("chan-1").await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0], sample("VOICE"));
    }

    #[tokio::test]
    async fn test_multiple_rows_newest_first() {
        let db = DatabaseManager::new("sqlite::memory:").await.unwrap();
        db.record_interaction(&sample("VOICE")).await.unwrap();
        db.record_interaction(&sample("DTMF")).await.unwrap();

        let rows = db.interactions_for("chan-1").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].recognition_mode, "DTMF");
    }
}
