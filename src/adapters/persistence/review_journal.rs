//! Implements ReviewJournalPort using a JSON file.
//!
//! Keeps every operation that ended in needs-review so an operator can
//! clean up what was left applied on the platform.

use crate::domain::{DomainError, ReviewEntry};
use crate::ports::ReviewJournalPort;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Debug, Default, Serialize, Deserialize)]
struct JournalData {
    entries: Vec<ReviewEntry>,
}

/// JSON file-based review journal.
pub struct JsonReviewJournal {
    path: PathBuf,
    cache: tokio::sync::RwLock<JournalData>,
}

impl JsonReviewJournal {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            cache: tokio::sync::RwLock::new(JournalData::default()),
        }
    }

    /// Load existing entries. A missing file is an empty journal; a corrupt one is an error
    /// so earlier entries are never silently overwritten.
    pub async fn load(&self) -> Result<(), DomainError> {
        let data = match fs::read_to_string(&self.path).await {
            Ok(s) => serde_json::from_str(&s).map_err(|e| {
                DomainError::Journal(format!(
                    "{} is not a review journal: {}",
                    self.path.display(),
                    e
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => JournalData::default(),
            Err(e) => {
                return Err(DomainError::Journal(format!(
                    "read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };
        *self.cache.write().await = data;
        Ok(())
    }

    /// Write-replace: temp file, sync, rename.
    async fn save(&self, data: &JournalData) -> Result<(), DomainError> {
        let json = serde_json::to_string_pretty(data)
            .map_err(|e| DomainError::Journal(e.to_string()))?;

        let temp_path = self.path.with_extension("json.tmp");
        let mut f = fs::File::create(&temp_path)
            .await
            .map_err(|e| DomainError::Journal(format!("create temp file: {}", e)))?;
        f.write_all(json.as_bytes())
            .await
            .map_err(|e| DomainError::Journal(format!("write temp file: {}", e)))?;
        f.sync_all()
            .await
            .map_err(|e| DomainError::Journal(format!("sync temp file: {}", e)))?;
        drop(f);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(|e| DomainError::Journal(format!("atomic rename failed: {}", e)))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl ReviewJournalPort for JsonReviewJournal {
    async fn record(&self, entry: &ReviewEntry) -> Result<(), DomainError> {
        // Held across the write so concurrent records cannot interleave saves.
        let mut cache = self.cache.write().await;
        cache.entries.push(entry.clone());
        if let Err(e) = self.save(&cache).await {
            cache.entries.pop();
            return Err(e);
        }
        Ok(())
    }

    async fn entries(&self) -> Result<Vec<ReviewEntry>, DomainError> {
        Ok(self.cache.read().await.entries.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CreatedEntity, EntityId, EntityKind, ErrorKind, Failure};
    use chrono::Utc;

    fn entry(student: &str) -> ReviewEntry {
        ReviewEntry {
            recorded_at: Utc::now(),
            operation: "enrollment".into(),
            item: Some(student.into()),
            failure: Failure {
                kind: ErrorKind::FatalTarget,
                entity: EntityKind::Enrollment,
                step: format!("enroll '{}' in activity A-5", student),
                message: "gave up after 3 attempts: no response".into(),
            },
            note: "enrollment may have been applied; rollback is not supported for enrollment"
                .into(),
            left_applied: vec![CreatedEntity {
                kind: EntityKind::Enrollment,
                id: EntityId::new("R-100"),
                name: student.into(),
            }],
        }
    }

    #[tokio::test]
    async fn test_entries_survive_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.json");

        let journal = JsonReviewJournal::new(&path);
        journal.load().await.unwrap();
        journal.record(&entry("Mario Rossi")).await.unwrap();
        journal.record(&entry("Anna Bianchi")).await.unwrap();

        let reopened = JsonReviewJournal::new(&path);
        reopened.load().await.unwrap();
        let entries = reopened.entries().await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].item.as_deref(), Some("Anna Bianchi"));
        assert!(!dir.path().join("review.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_missing_file_is_empty_journal() {
        let dir = tempfile::tempdir().unwrap();
        let journal = JsonReviewJournal::new(dir.path().join("absent.json"));
        journal.load().await.unwrap();
        assert!(journal.entries().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_corrupt_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("review.json");
        std::fs::write(&path, "not json").unwrap();
        let err = JsonReviewJournal::new(&path).load().await.unwrap_err();
        assert!(matches!(err, DomainError::Journal(_)));
    }
}
