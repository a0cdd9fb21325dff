//! Local archive of finished workflow records, one JSON file per record.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, warn};
use waymark_core_types::WorkflowRecord;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArchiveEntry {
    pub id: String,
    pub name: String,
    pub description: String,
    pub steps: usize,
    pub created_at: DateTime<Utc>,
}

impl From<&WorkflowRecord> for ArchiveEntry {
    fn from(record: &WorkflowRecord) -> Self {
        Self {
            id: record.id.to_string(),
            name: record.name.clone(),
            description: record.description.clone(),
            steps: record.len(),
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkflowArchive {
    dir: PathBuf,
}

impl WorkflowArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, id: &str) -> Result<PathBuf> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!("invalid record id: {id:?}");
        }
        Ok(self.dir.join(format!("{id}.json")))
    }

    pub async fn save(&self, record: &WorkflowRecord) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)
            .await
            .with_context(|| format!("Failed to create archive dir {}", self.dir.display()))?;
        let path = self.path_for(record.id.as_str())?;
        let payload = serde_json::to_vec_pretty(record).context("Failed to encode record")?;
        fs::write(&path, payload)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        debug!(path = %path.display(), steps = record.len(), "record archived");
        Ok(path)
    }

    pub async fn load(&self, id: &str) -> Result<WorkflowRecord> {
        let path = self.path_for(id)?;
        read_record(&path).await
    }

    /// Summaries of every archived record, newest first.
    pub async fn list(&self) -> Result<Vec<ArchiveEntry>> {
        let mut entries = Vec::new();
        let mut dir = match fs::read_dir(&self.dir).await {
            Ok(dir) => dir,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(entries),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("Failed to read {}", self.dir.display()))
            }
        };
        while let Some(item) = dir.next_entry().await? {
            let path = item.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match read_record(&path).await {
                Ok(record) => entries.push(ArchiveEntry::from(&record)),
                Err(err) => warn!(path = %path.display(), error = %err, "skipping unreadable record"),
            }
        }
        entries.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }

    /// Returns `false` when no record had that id.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let path = self.path_for(id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err).with_context(|| format!("Failed to delete {}", path.display())),
        }
    }
}

/// Read one record from a JSON file.
/// Load a record file; step numbers are rewritten to `1..=n` if they are not.
pub async fn read_record(path: &Path) -> Result<WorkflowRecord> {
    let content = fs::read(path)
        .await
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let mut record: WorkflowRecord = serde_json::from_slice(&content)
        .with_context(|| format!("Failed to parse record {}", path.display()))?;
    if !record.is_sequentially_numbered() {
        debug!(path = %path.display(), "renumbering record steps");
        record.renumber();
    }
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::Map;
    use waymark_core_types::{Step, TaskId};

    fn record(goal: &str, age_minutes: i64) -> WorkflowRecord {
        let mut record = WorkflowRecord::for_goal(TaskId::new(), goal);
        record.created_at = Utc::now() - Duration::minutes(age_minutes);
        record.push_step(Step::new("navigate", Map::new()).with_url("https://a.test"));
        record
    }

    #[tokio::test]
    async fn save_list_load_delete() {
        let dir = tempfile::tempdir().unwrap();
        let archive = WorkflowArchive::new(dir.path());
        let old = record("old goal", 30);
        let new = record("new goal", 1);
        archive.save(&old).await.unwrap();
        archive.save(&new).await.unwrap();

        let listed = archive.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].description, "new goal");

        let loaded = archive.load(old.id.as_str()).await.unwrap();
        assert_eq!(loaded, old);

        assert!(archive.delete(old.id.as_str()).await.unwrap());
        assert!(!archive.delete(old.id.as_str()).await.unwrap());
        assert_eq!(archive.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn loaded_records_are_numbered_from_one() {
        let dir = tempfile::tempdir().unwrap();
        let mut record = record("gappy goal", 0);
        record.push_step(Step::new("click_at", Map::new()));
        let mut raw = serde_json::to_value(&record).unwrap();
        raw["steps"][0]["step_number"] = 5.into();
        raw["steps"][1]["step_number"] = 9.into();
        let path = dir.path().join("gappy.json");
        std::fs::write(&path, serde_json::to_vec(&raw).unwrap()).unwrap();

        let loaded = read_record(&path).await.unwrap();
        assert!(loaded.is_sequentially_numbered());
        let numbers: Vec<u32> = loaded.steps().iter().map(|s| s.step_number).collect();
        assert_eq!(numbers, vec![1, 2]);
    }

    #[tokio::test]
    async fn missing_dir_lists_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let archive = WorkflowArchive::new(dir.path().join("absent"));
        assert!(archive.list().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn rejects_path_like_ids() {
        let dir = tempfile::tempdir().unwrap();
        let archive = WorkflowArchive::new(dir.path());
        assert!(archive.load("../etc/passwd").await.is_err());
    }
}
