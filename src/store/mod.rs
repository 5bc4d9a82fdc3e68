//! SQLite persistence
//!
//! All operations are synchronous (rusqlite is blocking). Async callers go
//! through `tokio::task::spawn_blocking`.

pub mod records;
pub mod schema;

pub use records::{
    CropRecommendation, DiseaseDetection, NewDetection, NewUser, PredictionHistoryEntry, ProfileUpdate, User,
};

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde_json::{Map, Value};

use crate::crop::SoilSample;
use crate::error::StoreError;
use crate::media::{self, StoredImage};

pub struct Store {
    conn: Mutex<Connection>,
}

/// Current time as stored in every timestamp column
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

impl Store {
    /// Create or open the database file, creating its directory if needed
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(db_path)?;
        schema::migrate(&conn)?;

        tracing::info!("Opened database at {:?}", db_path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    // ========================================================================
    // Users
    // ========================================================================

    /// Token-only account, as created by the `create_user` binary
    pub fn create_user(&self, username: &str, api_token: &str) -> Result<User, StoreError> {
        let new_user = NewUser {
            username: username.to_string(),
            ..NewUser::default()
        };
        self.register_user(&new_user, api_token)
    }

    /// Insert an account. A taken username is `StoreError::Duplicate`.
    pub fn register_user(&self, new_user: &NewUser, api_token: &str) -> Result<User, StoreError> {
        let conn = self.lock()?;
        let created_at = now_timestamp();
        conn.execute(
            "INSERT INTO users (username, api_token, password_hash, email, farm_location, phone, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_user.username,
                api_token,
                new_user.password_hash,
                new_user.email,
                new_user.farm_location,
                new_user.phone,
                created_at
            ],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(failure, _)
                if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                StoreError::Duplicate(format!("user {}", new_user.username))
            }
            other => StoreError::Sqlite(other),
        })?;

        let id = conn.last_insert_rowid();
        tracing::info!("Created user {} ({})", id, new_user.username);
        Ok(User {
            id,
            username: new_user.username.clone(),
            api_token: api_token.to_string(),
            email: new_user.email.clone(),
            farm_location: new_user.farm_location.clone(),
            phone: new_user.phone.clone(),
            created_at,
        })
    }

    pub fn user_by_token(&self, api_token: &str) -> Result<Option<User>, StoreError> {
        let conn = self.lock()?;
        let user = conn
            .query_row(
                &format!("SELECT {} FROM users WHERE api_token = ?1", USER_COLUMNS),
                params![api_token],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// A user and their stored password hash, for credential checks
    pub fn user_with_password(&self, username: &str) -> Result<Option<(User, String)>, StoreError> {
        let conn = self.lock()?;
        let found = conn
            .query_row(
                &format!("SELECT {}, password_hash FROM users WHERE username = ?1", USER_COLUMNS),
                params![username],
                |row| Ok((user_from_row(row)?, row.get::<_, String>(7)?)),
            )
            .optional()?;
        Ok(found)
    }

    /// Apply the given profile fields and return the updated user
    pub fn update_profile(&self, user_id: i64, update: &ProfileUpdate) -> Result<User, StoreError> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE users
             SET email = COALESCE(?2, email),
                 farm_location = COALESCE(?3, farm_location),
                 phone = COALESCE(?4, phone)
             WHERE id = ?1",
            params![user_id, update.email, update.farm_location, update.phone],
        )?;
        if changed == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }

        let user = conn.query_row(
            &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
            params![user_id],
            user_from_row,
        )?;
        tracing::info!("Updated profile of user {}", user_id);
        Ok(user)
    }

    /// Delete a user; their records go with them
    pub fn delete_user(&self, user_id: i64) -> Result<(), StoreError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM users WHERE id = ?1", params![user_id])?;
        if deleted == 0 {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        tracing::info!("Deleted user {}", user_id);
        Ok(())
    }

    // ========================================================================
    // Crop predictions
    // ========================================================================

    /// Store the recommendation and its history entry together
    pub fn record_crop_prediction(
        &self,
        user_id: i64,
        soil: &SoilSample,
        crop: &str,
        fertilizer: &str,
    ) -> Result<CropRecommendation, StoreError> {
        let soil_params = soil.to_params_json()?;
        let created_at = now_timestamp();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO crop_recommendations
                (user_id, nitrogen, phosphorus, potassium, ph, rainfall, humidity, temperature,
                 predicted_crop, recommended_fertilizer, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                user_id,
                soil.nitrogen,
                soil.phosphorus,
                soil.potassium,
                soil.ph,
                soil.rainfall,
                soil.humidity,
                soil.temperature,
                crop,
                fertilizer,
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();

        tx.execute(
            "INSERT INTO prediction_history (user_id, prediction_date, crop, fertilizer, soil_params_json)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![user_id, created_at, crop, fertilizer, soil_params],
        )?;
        tx.commit()?;

        tracing::info!("Recorded crop prediction {} for user {}: {}", id, user_id, crop);
        Ok(CropRecommendation {
            id,
            user_id,
            soil: *soil,
            predicted_crop: crop.to_string(),
            recommended_fertilizer: fertilizer.to_string(),
            created_at,
        })
    }

    /// History entries for a user, newest first
    pub fn prediction_history(&self, user_id: i64) -> Result<Vec<PredictionHistoryEntry>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, prediction_date, crop, fertilizer, soil_params_json
             FROM prediction_history
             WHERE user_id = ?1
             ORDER BY prediction_date DESC, id DESC",
        )?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(|(id, user_id, prediction_date, crop, fertilizer, json)| {
                Ok(PredictionHistoryEntry {
                    id,
                    user_id,
                    prediction_date,
                    crop,
                    fertilizer,
                    soil_params: parse_soil_params(&json)?,
                })
            })
            .collect()
    }

    /// Recommendation records for a user, newest first
    pub fn crop_recommendations(&self, user_id: i64) -> Result<Vec<CropRecommendation>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, user_id, nitrogen, phosphorus, potassium, ph, rainfall, humidity, temperature,
                    predicted_crop, recommended_fertilizer, created_at
             FROM crop_recommendations
             WHERE user_id = ?1
             ORDER BY created_at DESC, id DESC",
        )?;

        let rows = stmt.query_map(params![user_id], recommendation_from_row)?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }

    // ========================================================================
    // Disease detections
    // ========================================================================

    /// Insert a detection and attach its stored image in one transaction.
    /// `store_image` receives the new record id and places the image; it runs
    /// under the connection lock, so it should be a rename rather than a copy.
    /// If it fails nothing is recorded, and if the commit fails the placed
    /// file is removed again.
    pub fn record_detection<F>(
        &self,
        user: &User,
        detection: &NewDetection,
        store_image: F,
    ) -> Result<DiseaseDetection, StoreError>
    where
        F: FnOnce(i64) -> std::io::Result<StoredImage>,
    {
        let created_at = now_timestamp();

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO disease_detections (user_id, detected_disease, confidence, treatment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user.id,
                detection.detected_disease,
                detection.confidence,
                detection.treatment,
                created_at
            ],
        )?;
        let id = tx.last_insert_rowid();

        let image = store_image(id)?;
        let attached = tx
            .execute(
                "UPDATE disease_detections SET image = ?1 WHERE id = ?2",
                params![image.relative, id],
            )
            .and_then(|_| tx.commit());
        if let Err(e) = attached {
            media::discard_image(&image.path);
            return Err(e.into());
        }

        tracing::info!(
            "Recorded detection {} for user {}: {}",
            id,
            user.username,
            detection.detected_disease
        );
        Ok(DiseaseDetection {
            id,
            user_id: user.id,
            username: user.username.clone(),
            image: image.relative,
            detected_disease: detection.detected_disease.clone(),
            confidence: detection.confidence,
            treatment: detection.treatment.clone(),
            created_at,
        })
    }

    /// Detections for a user, newest first
    pub fn detection_history(&self, user_id: i64) -> Result<Vec<DiseaseDetection>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT d.id, d.user_id, u.username, d.image, d.detected_disease, d.confidence,
                    d.treatment, d.created_at
             FROM disease_detections d
             JOIN users u ON u.id = d.user_id
             WHERE d.user_id = ?1
             ORDER BY d.created_at DESC, d.id DESC",
        )?;

        let rows = stmt.query_map(params![user_id], |row| {
            Ok(DiseaseDetection {
                id: row.get(0)?,
                user_id: row.get(1)?,
                username: row.get(2)?,
                image: row.get(3)?,
                detected_disease: row.get(4)?,
                confidence: row.get(5)?,
                treatment: row.get(6)?,
                created_at: row.get(7)?,
            })
        })?;
        Ok(rows.collect::<Result<Vec<_>, _>>()?)
    }
}

const USER_COLUMNS: &str = "id, username, api_token, email, farm_location, phone, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        api_token: row.get(2)?,
        email: row.get(3)?,
        farm_location: row.get(4)?,
        phone: row.get(5)?,
        created_at: row.get(6)?,
    })
}

fn recommendation_from_row(row: &Row<'_>) -> rusqlite::Result<CropRecommendation> {
    Ok(CropRecommendation {
        id: row.get(0)?,
        user_id: row.get(1)?,
        soil: SoilSample {
            nitrogen: row.get(2)?,
            phosphorus: row.get(3)?,
            potassium: row.get(4)?,
            ph: row.get(5)?,
            rainfall: row.get(6)?,
            humidity: row.get(7)?,
            temperature: row.get(8)?,
        },
        predicted_crop: row.get(9)?,
        recommended_fertilizer: row.get(10)?,
        created_at: row.get(11)?,
    })
}

fn parse_soil_params(json: &str) -> Result<Map<String, Value>, StoreError> {
    Ok(serde_json::from_str(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;

    fn stored(relative: String) -> io::Result<StoredImage> {
        Ok(StoredImage {
            path: PathBuf::from(&relative),
            relative,
        })
    }

    fn store_with_user(name: &str) -> (Store, User) {
        let store = Store::open_in_memory().unwrap();
        let user = store.create_user(name, &format!("{}-token", name)).unwrap();
        (store, user)
    }

    fn sample() -> SoilSample {
        SoilSample {
            nitrogen: 10.0,
            phosphorus: 50.0,
            potassium: 50.0,
            ph: 6.5,
            rainfall: 200.0,
            humidity: 80.0,
            temperature: 25.0,
        }
    }

    fn detection(label: &str) -> NewDetection {
        NewDetection {
            detected_disease: label.to_string(),
            confidence: 0.5,
            treatment: "spray".to_string(),
        }
    }

    #[test]
    fn test_token_lookup() {
        let (store, user) = store_with_user("alice");
        let found = store.user_by_token("alice-token").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.username, "alice");
        assert!(store.user_by_token("nope").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_username_rejected() {
        let (store, _) = store_with_user("alice");
        assert!(matches!(
            store.create_user("alice", "other-token"),
            Err(StoreError::Duplicate(_))
        ));
    }

    #[test]
    fn test_registered_user_keeps_profile_and_hash() {
        let store = Store::open_in_memory().unwrap();
        let new_user = NewUser {
            username: "bob".to_string(),
            email: "bob@example.com".to_string(),
            farm_location: "Nakuru".to_string(),
            phone: String::new(),
            password_hash: "hashed".to_string(),
        };
        let user = store.register_user(&new_user, "bob-token").unwrap();
        assert_eq!(user.email, "bob@example.com");

        let (found, hash) = store.user_with_password("bob").unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.farm_location, "Nakuru");
        assert_eq!(hash, "hashed");
        assert!(store.user_with_password("carol").unwrap().is_none());

        // Token-only accounts have no password
        store.create_user("dave", "dave-token").unwrap();
        assert_eq!(store.user_with_password("dave").unwrap().unwrap().1, "");
    }

    #[test]
    fn test_profile_update_is_partial() {
        let (store, user) = store_with_user("alice");
        let updated = store
            .update_profile(
                user.id,
                &ProfileUpdate {
                    email: Some("alice@example.com".to_string()),
                    phone: Some("0700".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.phone, "0700");

        let updated = store
            .update_profile(
                user.id,
                &ProfileUpdate {
                    farm_location: Some("Eldoret".to_string()),
                    ..ProfileUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.email, "alice@example.com");
        assert_eq!(updated.farm_location, "Eldoret");
        assert_eq!(store.user_by_token("alice-token").unwrap().unwrap().phone, "0700");

        assert!(matches!(
            store.update_profile(999, &ProfileUpdate::default()),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_crop_prediction_writes_recommendation_and_history() {
        let (store, user) = store_with_user("alice");
        let rec = store
            .record_crop_prediction(user.id, &sample(), "rice", "Urea")
            .unwrap();
        assert_eq!(rec.predicted_crop, "rice");
        assert_eq!(rec.recommended_fertilizer, "Urea");

        let history = store.prediction_history(user.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].crop, "rice");
        assert_eq!(history[0].fertilizer, "Urea");
        assert_eq!(history[0].prediction_date, rec.created_at);
        assert_eq!(history[0].soil_params["nitrogen"], serde_json::json!(10.0));
        assert_eq!(history[0].soil_params["ph"], serde_json::json!(6.5));
        assert_eq!(history[0].soil_params.len(), 7);

        let recs = store.crop_recommendations(user.id).unwrap();
        assert_eq!(recs.len(), 1);
        assert_eq!(recs[0].soil, sample());
    }

    #[test]
    fn test_history_is_newest_first_and_per_user() {
        let (store, alice) = store_with_user("alice");
        let bob = store.create_user("bob", "bob-token").unwrap();

        store.record_crop_prediction(alice.id, &sample(), "rice", "Urea").unwrap();
        store.record_crop_prediction(alice.id, &sample(), "wheat", "Ammonium Sulfate").unwrap();
        store.record_crop_prediction(bob.id, &sample(), "maize", "x").unwrap();

        let crops: Vec<_> = store
            .prediction_history(alice.id)
            .unwrap()
            .into_iter()
            .map(|h| h.crop)
            .collect();
        assert_eq!(crops, ["wheat", "rice"]);
        assert_eq!(store.prediction_history(bob.id).unwrap().len(), 1);
    }

    #[test]
    fn test_detection_image_keyed_by_record_id() {
        let (store, user) = store_with_user("alice");
        let saved = store
            .record_detection(&user, &detection("Peach___healthy"), |id| {
                stored(format!("plant_disease_images/{}_leaf.jpg", id))
            })
            .unwrap();

        assert_eq!(saved.image, format!("plant_disease_images/{}_leaf.jpg", saved.id));
        assert_eq!(saved.username, "alice");

        let history = store.detection_history(user.id).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].image, saved.image);
    }

    #[test]
    fn test_failed_image_storage_records_nothing() {
        let (store, user) = store_with_user("alice");
        let result = store.record_detection(&user, &detection("x"), |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only media"))
        });
        assert!(matches!(result, Err(StoreError::Io(_))));
        assert!(store.detection_history(user.id).unwrap().is_empty());
    }

    #[test]
    fn test_failed_commit_removes_placed_image() {
        let (store, user) = store_with_user("alice");
        store
            .lock()
            .unwrap()
            .execute_batch(
                "CREATE TRIGGER no_images BEFORE UPDATE OF image ON disease_detections
                 BEGIN SELECT RAISE(ABORT, 'images are read-only'); END;",
            )
            .unwrap();

        let dir = tempfile::TempDir::new().unwrap();
        let placed = dir.path().join("1_leaf.png");
        let result = store.record_detection(&user, &detection("x"), |id| {
            std::fs::write(&placed, b"pixels")?;
            Ok(StoredImage {
                relative: format!("plant_disease_images/{}_leaf.png", id),
                path: placed.clone(),
            })
        });

        assert!(matches!(result, Err(StoreError::Sqlite(_))));
        assert!(!placed.exists());
        assert!(store.detection_history(user.id).unwrap().is_empty());
    }

    #[test]
    fn test_detections_newest_first() {
        let (store, user) = store_with_user("alice");
        for label in ["first", "second", "third"] {
            store
                .record_detection(&user, &detection(label), |id| stored(id.to_string()))
                .unwrap();
        }
        let labels: Vec<_> = store
            .detection_history(user.id)
            .unwrap()
            .into_iter()
            .map(|d| d.detected_disease)
            .collect();
        assert_eq!(labels, ["third", "second", "first"]);
    }

    #[test]
    fn test_deleting_user_cascades() {
        let (store, user) = store_with_user("alice");
        store.record_crop_prediction(user.id, &sample(), "rice", "Urea").unwrap();
        store
            .record_detection(&user, &detection("x"), |id| stored(id.to_string()))
            .unwrap();

        store.delete_user(user.id).unwrap();
        assert!(store.prediction_history(user.id).unwrap().is_empty());
        assert!(store.crop_recommendations(user.id).unwrap().is_empty());
        assert!(store.detection_history(user.id).unwrap().is_empty());
        assert!(matches!(store.delete_user(user.id), Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_unknown_owner_rejected() {
        let store = Store::open_in_memory().unwrap();
        assert!(store.record_crop_prediction(42, &sample(), "rice", "Urea").is_err());
    }

    #[test]
    fn test_file_database_persists_across_opens() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("farm.db");
        {
            let store = Store::open(&path).unwrap();
            store.create_user("alice", "tok").unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert!(store.user_by_token("tok").unwrap().is_some());
    }
}
