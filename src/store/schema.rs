use rusqlite::Connection;

/// Apply the idempotent schema. Safe to run on every open.
pub fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    tracing::debug!("Running database migrations");

    conn.execute_batch(SCHEMA)?;

    tracing::debug!("Database migrations complete");
    Ok(())
}

const SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- ============================================================================
-- Users (identity collaborator)
-- ============================================================================

CREATE TABLE IF NOT EXISTS users (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    username        TEXT NOT NULL UNIQUE,
    api_token       TEXT NOT NULL UNIQUE,
    -- Empty for accounts created offline; those sign in by token only
    password_hash   TEXT NOT NULL DEFAULT '',
    email           TEXT NOT NULL DEFAULT '',
    farm_location   TEXT NOT NULL DEFAULT '',
    phone           TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL
);

-- ============================================================================
-- Crop recommendations
-- ============================================================================

CREATE TABLE IF NOT EXISTS crop_recommendations (
    id                      INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id                 INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    nitrogen                REAL NOT NULL,
    phosphorus              REAL NOT NULL,
    potassium               REAL NOT NULL,
    ph                      REAL NOT NULL,
    rainfall                REAL NOT NULL,
    humidity                REAL NOT NULL,
    temperature             REAL NOT NULL,
    predicted_crop          TEXT NOT NULL,
    recommended_fertilizer  TEXT NOT NULL,
    created_at              TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crop_rec_user ON crop_recommendations(user_id, created_at DESC);

-- ============================================================================
-- Prediction history (denormalised copy of each recommendation)
-- ============================================================================

CREATE TABLE IF NOT EXISTS prediction_history (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    prediction_date     TEXT NOT NULL,
    crop                TEXT NOT NULL,
    fertilizer          TEXT NOT NULL,
    soil_params_json    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_history_user ON prediction_history(user_id, prediction_date DESC);

-- ============================================================================
-- Disease detections
-- ============================================================================

CREATE TABLE IF NOT EXISTS disease_detections (
    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
    user_id             INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    image               TEXT NOT NULL DEFAULT '',
    detected_disease    TEXT NOT NULL,
    confidence          REAL NOT NULL,
    treatment           TEXT NOT NULL,
    created_at          TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_detections_user ON disease_detections(user_id, created_at DESC);
"#;
