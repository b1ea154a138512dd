use crate::cron::error::Result;
use crate::cron::types::{CronJob, CronStoreData, STORE_VERSION};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

pub const STORE_FILE: &str = "cron.json";

/// JSON-file job store. Every mutation reloads the file, applies the change
/// in memory and rewrites the whole document.
pub struct CronStore {
    path: PathBuf,
    version: u32,
    pub jobs: Vec<CronJob>,
}

impl CronStore {
    pub fn new(data_dir: PathBuf) -> Self {
        let path = data_dir.join(STORE_FILE);
        Self {
            path,
            version: STORE_VERSION,
            jobs: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the in-memory jobs with the persisted ones. A missing,
    /// unreadable or corrupt file yields an empty store.
    pub fn load(&mut self) {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                self.jobs = Vec::new();
                return;
            }
            Err(e) => {
                warn!("Failed to read cron store {}: {}", self.path.display(), e);
                self.jobs = Vec::new();
                return;
            }
        };

        match serde_json::from_str::<CronStoreData>(&content) {
            Ok(data) => {
                if data.version != STORE_VERSION {
                    warn!(
                        "Cron store {} has version {}, expected {}; loading as-is",
                        self.path.display(),
                        data.version,
                        STORE_VERSION
                    );
                }
                self.version = data.version;
                self.jobs = data.jobs;
            }
            Err(e) => {
                warn!(
                    "Cron store {} is corrupt, starting empty: {}",
                    self.path.display(),
                    e
                );
                self.jobs = Vec::new();
            }
        }
    }

    /// Write the whole collection to a uniquely named sibling temp file, then
    /// rename it over the canonical path. Concurrent writers never share a
    /// temp file.
    pub fn save(&self) -> Result<()> {
        let data = CronStoreData {
            jobs: self.jobs.clone(),
            version: self.version,
        };
        let content = serde_json::to_string_pretty(&data)?;
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut tmp = NamedTempFile::new_in(dir)?;
        tmp.write_all(content.as_bytes())?;
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }

    pub fn add(&mut self, job: CronJob) -> Result<()> {
        self.load();
        self.jobs.push(job);
        self.save()
    }

    pub fn remove(&mut self, id: &str) -> Result<bool> {
        self.load();
        let len_before = self.jobs.len();
        self.jobs.retain(|j| j.id != id);
        let removed = self.jobs.len() < len_before;
        if removed {
            self.save()?;
        }
        Ok(removed)
    }

    /// Apply `f` to the job with `id` and persist. Returns the updated job,
    /// or `None` (without writing) when no such job exists.
    pub fn update<F>(&mut self, id: &str, f: F) -> Result<Option<CronJob>>
    where
        F: FnOnce(&mut CronJob),
    {
        self.load();
        let Some(job) = self.jobs.iter_mut().find(|j| j.id == id) else {
            return Ok(None);
        };
        f(job);
        let updated = job.clone();
        self.save()?;
        Ok(Some(updated))
    }

    /// Drop every disabled job. Returns the removed jobs.
    pub fn remove_disabled(&mut self) -> Result<Vec<CronJob>> {
        self.load();
        let (disabled, kept): (Vec<_>, Vec<_>) =
            std::mem::take(&mut self.jobs).into_iter().partition(|j| !j.enabled);
        self.jobs = kept;
        if !disabled.is_empty() {
            self.save()?;
        }
        Ok(disabled)
    }

    pub fn get(&mut self, id: &str) -> Option<CronJob> {
        self.load();
        self.jobs.iter().find(|j| j.id == id).cloned()
    }

    pub fn all(&mut self) -> Vec<CronJob> {
        self.load();
        self.jobs.clone()
    }

    pub fn has_job_with_name(&mut self, name: &str) -> bool {
        self.load();
        self.jobs.iter().any(|j| j.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cron::types::{JobStatus, ScheduleKind};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn job(id: &str, name: &str, enabled: bool) -> CronJob {
        CronJob {
            id: id.to_string(),
            name: name.to_string(),
            kind: ScheduleKind::Interval,
            schedule: "5m".to_string(),
            interval_ms: Some(300_000),
            payload: "ping".to_string(),
            enabled,
            created_at: Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap(),
            last_run_at: None,
            last_status: None,
            last_error: None,
            run_count: 0,
            next_run_at: None,
            description: None,
        }
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        assert!(store.all().is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn corrupt_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(STORE_FILE), "{ not json").unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        assert!(store.all().is_empty());
    }

    #[test]
    fn crud_cycle() {
        let dir = TempDir::new().unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        store.add(job("a", "alpha", true)).unwrap();
        store.add(job("b", "beta", false)).unwrap();

        // A second handle sees the persisted state.
        let mut other = CronStore::new(dir.path().to_path_buf());
        assert_eq!(other.all().len(), 2);
        assert!(other.has_job_with_name("alpha"));
        assert!(!other.has_job_with_name("Alpha"));

        let updated = store
            .update("a", |j| {
                j.run_count += 1;
                j.last_status = Some(JobStatus::Success);
            })
            .unwrap()
            .unwrap();
        assert_eq!(updated.run_count, 1);
        assert_eq!(other.get("a").unwrap().last_status, Some(JobStatus::Success));

        assert!(store.update("missing", |j| j.enabled = false).unwrap().is_none());

        assert!(store.remove("a").unwrap());
        assert!(!store.remove("a").unwrap());
        assert_eq!(other.all().len(), 1);
    }

    #[test]
    fn remove_disabled_keeps_enabled() {
        let dir = TempDir::new().unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        store.add(job("a", "alpha", true)).unwrap();
        store.add(job("b", "beta", false)).unwrap();
        store.add(job("c", "gamma", false)).unwrap();

        let removed = store.remove_disabled().unwrap();
        assert_eq!(removed.len(), 2);
        let ids: Vec<_> = store.all().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec!["a".to_string()]);
    }

    #[test]
    fn save_of_load_is_a_no_op() {
        let dir = TempDir::new().unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        let mut j = job("a", "alpha", true);
        j.last_run_at = Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap());
        j.description = Some("hourly check".to_string());
        store.add(j).unwrap();
        store.add(job("b", "beta", false)).unwrap();

        let before = fs::read(store.path()).unwrap();
        let mut reloaded = CronStore::new(dir.path().to_path_buf());
        reloaded.load();
        reloaded.save().unwrap();
        let after = fs::read(store.path()).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn unknown_version_passes_through() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(STORE_FILE);
        fs::write(&path, r#"{"jobs":[],"version":7}"#).unwrap();

        let mut store = CronStore::new(dir.path().to_path_buf());
        store.add(job("a", "alpha", true)).unwrap();

        let data: CronStoreData = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(data.version, 7);
        assert_eq!(data.jobs.len(), 1);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let mut store = CronStore::new(dir.path().to_path_buf());
        store.add(job("a", "alpha", true)).unwrap();
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![STORE_FILE.to_string()]);
    }

    #[test]
    fn concurrent_writers_do_not_clobber_each_other() {
        let dir = TempDir::new().unwrap();
        let failures = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let dir = dir.path().to_path_buf();
                let failures = &failures;
                scope.spawn(move || {
                    let mut store = CronStore::new(dir);
                    store.jobs = (0..20)
                        .map(|i| job(&format!("{writer}-{i}"), &format!("job-{writer}-{i}"), true))
                        .collect();
                    for _ in 0..50 {
                        if store.save().is_err() {
                            failures.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                        }
                    }
                });
            }
        });

        assert_eq!(failures.into_inner(), 0);
        let content = fs::read_to_string(dir.path().join(STORE_FILE)).unwrap();
        let data: CronStoreData = serde_json::from_str(&content).unwrap();
        assert_eq!(data.jobs.len(), 20);

        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec![STORE_FILE.to_string()]);
    }
}
