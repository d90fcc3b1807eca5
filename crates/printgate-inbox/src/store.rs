// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Per-user queue descriptor store.
//
// Each user owns one JSON descriptor file plus the rendered job files it
// references, all under `<dir>/<user>/`.  Writes go through a temp file in
// the same directory followed by an atomic rename, so a crashed writer can
// never leave a half-written descriptor behind.  A descriptor that fails to
// parse is self-healing: it is replaced by an empty document with a warning
// rather than failing the operation.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, instrument, warn};

use printgate_core::UserId;
use printgate_core::error::{GatewayError, Result};

use crate::document::{QueueDocument, SourceJob};

/// Descriptor file name inside each user directory.
const DESCRIPTOR_FILE: &str = "queue.json";

/// Filesystem store for per-user queue documents.
///
/// The store itself holds no locks: two concurrent read-modify-write cycles
/// for the *same* user must be serialized by the caller (a per-user lock is
/// a documented precondition of the dispatch path).
pub struct InboxStore {
    /// Root directory holding one subdirectory per user.
    dir: PathBuf,
}

impl InboxStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding a user's descriptor and job files.
    pub fn user_dir(&self, user: &UserId) -> PathBuf {
        self.dir.join(&user.0)
    }

    /// Absolute path of a job file referenced by a descriptor.
    pub fn job_file_path(&self, user: &UserId, job: &SourceJob) -> PathBuf {
        self.user_dir(user).join(&job.file)
    }

    /// Load a user's queue document.
    ///
    /// A missing descriptor is an empty queue.  A malformed descriptor is
    /// deleted and replaced by an empty queue with a warning — never a
    /// fatal error.
    #[instrument(skip(self), fields(user = %user))]
    pub fn load(&self, user: &UserId) -> Result<QueueDocument> {
        let path = self.user_dir(user).join(DESCRIPTOR_FILE);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!("no descriptor yet, empty queue");
                return Ok(QueueDocument::empty());
            }
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_slice::<QueueDocument>(&bytes) {
            Ok(doc) => Ok(doc),
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "malformed queue descriptor dropped, starting empty"
                );
                let _ = fs::remove_file(&path);
                Ok(QueueDocument::empty())
            }
        }
    }

    /// Persist a user's queue document via temp-file-then-atomic-rename.
    #[instrument(skip(self, doc), fields(user = %user, jobs = doc.jobs.len()))]
    pub fn save(&self, user: &UserId, doc: &QueueDocument) -> Result<()> {
        let dir = self.user_dir(user);
        fs::create_dir_all(&dir)?;

        let mut tmp = tempfile::NamedTempFile::new_in(&dir)
            .map_err(|e| GatewayError::Store(format!("temp descriptor: {e}")))?;
        serde_json::to_writer_pretty(&mut tmp, doc)?;

        let path = dir.join(DESCRIPTOR_FILE);
        tmp.persist(&path)
            .map_err(|e| GatewayError::Store(format!("persist descriptor: {e}")))?;

        debug!(path = %path.display(), "descriptor written");
        Ok(())
    }

    /// Remove page-range-orphaned jobs from the document and delete their
    /// underlying files.  Returns the number of jobs pruned.  The caller
    /// still needs to [`save`](Self::save) the document.
    #[instrument(skip(self, doc), fields(user = %user))]
    pub fn prune_orphans(&self, user: &UserId, doc: &mut QueueDocument) -> usize {
        let orphans = doc.orphaned_jobs();
        if orphans.is_empty() {
            return 0;
        }
        let removed = doc.remove_jobs(&orphans);
        for job in &removed {
            let path = self.job_file_path(user, job);
            if let Err(err) = fs::remove_file(&path) {
                // The descriptor no longer references the file either way.
                warn!(path = %path.display(), error = %err, "orphaned job file not deleted");
            }
        }
        info!(pruned = removed.len(), "orphaned jobs pruned");
        removed.len()
    }

    /// Delete a user's whole queue: descriptor and all referenced job files.
    #[instrument(skip(self), fields(user = %user))]
    pub fn clear(&self, user: &UserId) -> Result<()> {
        let doc = self.load(user)?;
        for job in &doc.jobs {
            let _ = fs::remove_file(self.job_file_path(user, job));
        }
        let path = self.user_dir(user).join(DESCRIPTOR_FILE);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn store() -> (tempfile::TempDir, InboxStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = InboxStore::new(dir.path());
        (dir, store)
    }

    fn job(file: &str, pages: u32) -> SourceJob {
        SourceJob {
            file: file.into(),
            title: file.into(),
            pages,
            rotate: 0,
            landscape: false,
            created_at: Utc::now(),
            drm: false,
        }
    }

    #[test]
    fn load_missing_is_empty() {
        let (_dir, store) = store();
        let doc = store.load(&UserId("alice".into())).expect("load");
        assert!(doc.is_empty());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let (_dir, store) = store();
        let user = UserId("alice".into());

        let mut doc = QueueDocument::empty();
        doc.add_job(job("a.pdf", 5));
        doc.letterhead = Some("corporate".into());

        store.save(&user, &doc).expect("save");
        let loaded = store.load(&user).expect("reload");
        assert_eq!(loaded, doc);
    }

    #[test]
    fn malformed_descriptor_self_heals() {
        let (_dir, store) = store();
        let user = UserId("bob".into());

        let dir = store.user_dir(&user);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join(DESCRIPTOR_FILE), b"{not json").expect("write junk");

        let doc = store.load(&user).expect("load heals");
        assert!(doc.is_empty());
        // The offending file is gone; the next load starts clean too.
        assert!(!dir.join(DESCRIPTOR_FILE).exists());
    }

    #[test]
    fn prune_deletes_orphaned_files() {
        let (_dir, store) = store();
        let user = UserId("carol".into());

        let mut doc = QueueDocument::empty();
        doc.add_job(job("a.pdf", 5));
        doc.add_job(job("b.pdf", 3));

        let dir = store.user_dir(&user);
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("a.pdf"), b"%PDF-a").expect("write a");
        fs::write(dir.join("b.pdf"), b"%PDF-b").expect("write b");

        // Edit away every page of job 0.
        doc.pages.retain(|e| e.job != 0);
        let pruned = store.prune_orphans(&user, &mut doc);
        assert_eq!(pruned, 1);
        assert!(!dir.join("a.pdf").exists());
        assert!(dir.join("b.pdf").exists());
        assert_eq!(doc.jobs.len(), 1);
        assert_eq!(doc.pages[0].job, 0);
    }

    #[test]
    fn clear_removes_descriptor_and_files() {
        let (_dir, store) = store();
        let user = UserId("dave".into());

        let mut doc = QueueDocument::empty();
        doc.add_job(job("a.pdf", 2));
        store.save(&user, &doc).expect("save");
        fs::write(store.user_dir(&user).join("a.pdf"), b"%PDF").expect("write");

        store.clear(&user).expect("clear");
        assert!(store.load(&user).expect("load").is_empty());
        assert!(!store.user_dir(&user).join("a.pdf").exists());
    }
}
