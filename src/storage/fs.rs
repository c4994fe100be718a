//! Filesystem-backed collaborators.
//!
//! Layout under the store directory:
//!
//! ```text
//! directory.toml              identities, active flags, geofences, shifts
//! <identity>/profile.bin      postcard-encoded FaceProfile
//! <identity>/backups/*.bin    profiles saved before overwrite or removal
//! evidence/<identity>/*       raw captures
//! audit.jsonl                 append-only verification events
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use log::warn;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use super::{AuditSink, BlobStore, IdentityRepository, StoreResult};
use crate::constraints::{Geofence, IdentityConstraints, Shift};
use crate::error::StoreError;
use crate::event::VerificationEvent;
use crate::profile::{Evidence, EvidenceRef, FaceProfile};

const DIRECTORY_FILE: &str = "directory.toml";
const PROFILE_FILE: &str = "profile.bin";
const BACKUP_DIR: &str = "backups";
const EVIDENCE_DIR: &str = "evidence";
const AUDIT_FILE: &str = "audit.jsonl";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryEntry {
    pub active: bool,
    pub geofence: Option<Geofence>,
    pub shift: Option<Shift>,
}

impl DirectoryEntry {
    pub fn active() -> Self {
        Self {
            active: true,
            ..Self::default()
        }
    }

    pub fn constraints(&self) -> IdentityConstraints {
        IdentityConstraints {
            geofence: self.geofence,
            shift: self.shift,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct Directory {
    identities: BTreeMap<String, DirectoryEntry>,
}

/// Identity ids become directory names, so keep them to a safe alphabet.
pub fn validate_identity_id(identity_id: &str) -> StoreResult<()> {
    let valid = !identity_id.is_empty()
        && !identity_id.starts_with('.')
        && identity_id != EVIDENCE_DIR
        && identity_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '@'));
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidKey(identity_id.to_string()))
    }
}

#[derive(Debug)]
pub struct FsIdentityRepository {
    root: PathBuf,
    directory_lock: Mutex<()>,
}

impl FsIdentityRepository {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            directory_lock: Mutex::new(()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn identity_dir(&self, identity_id: &str) -> StoreResult<PathBuf> {
        validate_identity_id(identity_id)?;
        Ok(self.root.join(identity_id))
    }

    fn profile_path(&self, identity_id: &str) -> StoreResult<PathBuf> {
        Ok(self.identity_dir(identity_id)?.join(PROFILE_FILE))
    }

    fn read_directory(&self) -> StoreResult<Directory> {
        let path = self.root.join(DIRECTORY_FILE);
        if !path.exists() {
            return Ok(Directory::default());
        }
        let raw = fs::read_to_string(&path).map_err(|source| StoreError::Read {
            path: path.clone(),
            source,
        })?;
        toml::from_str(&raw).map_err(|err| StoreError::Corrupt {
            path,
            message: err.to_string(),
        })
    }

    /// Add or update an identity in `directory.toml`.
    pub fn upsert_identity(&self, identity_id: &str, entry: DirectoryEntry) -> StoreResult<()> {
        validate_identity_id(identity_id)?;
        let _guard = self.directory_lock.lock();
        let mut directory = self.read_directory()?;
        directory.identities.insert(identity_id.to_string(), entry);
        let data = toml::to_string_pretty(&directory)
            .map_err(|err| StoreError::Serialization(err.to_string()))?;
        write_atomic(&self.root.join(DIRECTORY_FILE), data.as_bytes())
    }

    pub fn directory_entry(&self, identity_id: &str) -> StoreResult<Option<DirectoryEntry>> {
        Ok(self.read_directory()?.identities.get(identity_id).copied())
    }

    fn read_profile(path: &Path) -> StoreResult<FaceProfile> {
        let data = fs::read(path).map_err(|source| StoreError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        postcard::from_bytes(&data).map_err(|err| StoreError::Corrupt {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }
}

impl IdentityRepository for FsIdentityRepository {
    /// Ordered by registration time, then identity id.
    fn load_all(&self) -> StoreResult<Vec<FaceProfile>> {
        if !self.root.exists() {
            return Ok(vec![]);
        }
        let entries = fs::read_dir(&self.root).map_err(|source| StoreError::Read {
            path: self.root.clone(),
            source,
        })?;

        let mut profiles = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Read {
                path: self.root.clone(),
                source,
            })?;
            let path = entry.path().join(PROFILE_FILE);
            if path.is_file() {
                profiles.push(Self::read_profile(&path)?);
            }
        }
        profiles.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.identity_id.cmp(&b.identity_id))
        });
        Ok(profiles)
    }

    fn load_one(&self, identity_id: &str) -> StoreResult<Option<FaceProfile>> {
        let path = self.profile_path(identity_id)?;
        if !path.exists() {
            return Ok(None);
        }
        Self::read_profile(&path).map(Some)
    }

    fn is_active(&self, identity_id: &str) -> StoreResult<bool> {
        Ok(self
            .directory_entry(identity_id)?
            .map(|e| e.active)
            .unwrap_or(false))
    }

    fn population(&self) -> StoreResult<usize> {
        let directory = self.read_directory()?;
        let unlisted = self
            .load_all()?
            .iter()
            .filter(|p| !directory.identities.contains_key(&p.identity_id))
            .count();
        Ok(directory.identities.len() + unlisted)
    }

    fn constraints(&self, identity_id: &str) -> StoreResult<IdentityConstraints> {
        Ok(self
            .directory_entry(identity_id)?
            .map(|e| e.constraints())
            .unwrap_or_default())
    }

    fn save(&self, profile: &FaceProfile) -> StoreResult<()> {
        let path = self.profile_path(&profile.identity_id)?;
        let data = postcard::to_allocvec(profile)?;
        write_atomic(&path, &data)
    }

    fn remove(&self, identity_id: &str) -> StoreResult<()> {
        let path = self.profile_path(identity_id)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Write { path, source })?;
        }
        Ok(())
    }

    fn backup(&self, profile: &FaceProfile) -> StoreResult<()> {
        let dir = self.identity_dir(&profile.identity_id)?.join(BACKUP_DIR);
        let name = format!("{}.bin", Utc::now().format("%Y%m%d%H%M%S%3f"));
        let data = postcard::to_allocvec(profile)?;
        write_atomic(&dir.join(name), &data)
    }
}

/// Write through a temp file in the same directory, then rename into place.
fn write_atomic(path: &Path, data: &[u8]) -> StoreResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent).map_err(|source| StoreError::Write {
        path: parent.to_path_buf(),
        source,
    })?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(|source| StoreError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|source| StoreError::Write {
            path: path.to_path_buf(),
            source,
        })?;
    tmp.persist(path).map_err(|err| StoreError::Write {
        path: path.to_path_buf(),
        source: err.error,
    })?;
    Ok(())
}

/// JSON-lines audit log. Appends are serialised within the process.
#[derive(Debug)]
pub struct JsonlAuditLog {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonlAuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_store(root: &Path) -> Self {
        Self::new(root.join(AUDIT_FILE))
    }
}

impl AuditSink for JsonlAuditLog {
    fn append(&self, event: &VerificationEvent) -> StoreResult<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| StoreError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|source| StoreError::Write {
                path: self.path.clone(),
                source,
            })?;
        file.write_all(&line).map_err(|source| StoreError::Write {
            path: self.path.clone(),
            source,
        })
    }

    fn events_since(&self, since: DateTime<Utc>) -> StoreResult<Vec<VerificationEvent>> {
        if !self.path.exists() {
            return Ok(vec![]);
        }
        let file = fs::File::open(&self.path).map_err(|source| StoreError::Read {
            path: self.path.clone(),
            source,
        })?;

        let mut events = Vec::new();
        for (number, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|source| StoreError::Read {
                path: self.path.clone(),
                source,
            })?;
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<VerificationEvent>(&line) {
                Ok(event) if event.timestamp >= since => events.push(event),
                Ok(_) => {}
                Err(err) => warn!(
                    "Skipping unreadable audit line {} in {}: {}",
                    number + 1,
                    self.path.display(),
                    err
                ),
            }
        }
        Ok(events)
    }
}

#[derive(Debug)]
pub struct FsBlobStore {
    root: PathBuf,
}

impl FsBlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn in_store(root: &Path) -> Self {
        Self::new(root.join(EVIDENCE_DIR))
    }

    fn resolve(&self, reference: &EvidenceRef) -> StoreResult<PathBuf> {
        let relative = Path::new(&reference.0);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidKey(reference.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

impl BlobStore for FsBlobStore {
    fn put(&self, owner: &str, evidence: &Evidence) -> StoreResult<EvidenceRef> {
        validate_identity_id(owner)?;
        let extension: String = evidence
            .extension
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .collect();
        let name = format!(
            "{owner}_{}_{}.{}",
            Utc::now().format("%Y%m%d%H%M%S"),
            &Uuid::new_v4().simple().to_string()[..8],
            if extension.is_empty() { "bin" } else { &extension }
        );
        let reference = EvidenceRef(format!("{owner}/{name}"));
        write_atomic(&self.resolve(&reference)?, &evidence.bytes)?;
        Ok(reference)
    }

    fn get(&self, reference: &EvidenceRef) -> StoreResult<Vec<u8>> {
        let path = self.resolve(reference)?;
        if !path.exists() {
            return Err(StoreError::MissingEvidence(reference.to_string()));
        }
        fs::read(&path).map_err(|source| StoreError::Read { path, source })
    }

    fn delete(&self, reference: &EvidenceRef) -> StoreResult<()> {
        let path = self.resolve(reference)?;
        if path.exists() {
            fs::remove_file(&path).map_err(|source| StoreError::Write { path, source })?;
        }
        Ok(())
    }
}
