use crate::error::{LocalStoreError, RemoteError};
use crate::net::{ApiCall, PenaltyReply, ProgressReply, Transport};
use anyhow::Context;
use async_trait::async_trait;
use challenge_model::catalog::starter_requirements;
use challenge_model::constants::{LOCAL_GROUP_NAME, MAX_GROUP_NAME_LEN};
use challenge_model::{
    AuthFlags, Challenge, ChallengeSnapshot, Group, GroupId, PenaltyMeta, ProgressMap,
    RequirementModel, Timer, Topology,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

// Challenges that live only on this device. Records are replaced whole on every write; there is
// no partial patching.

pub const LOCAL_GROUP_ID: GroupId = 0;

const RECORD_EXTENSION: &str = "msgpack";

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LocalPenaltyInfo {
    pub text: String,
    #[serde(default)]
    pub meta: Option<PenaltyMeta>,
}

#[derive(Clone, Serialize, Deserialize, Debug, PartialEq)]
pub struct LocalRecord {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub requirements: RequirementModel,
    #[serde(default)]
    pub progress: ProgressMap,
    #[serde(default)]
    pub penalty: Option<LocalPenaltyInfo>,
}

/// Raw byte storage for encoded records, addressed by record id.
pub trait RecordBackend: Send + Sync {
    fn list_ids(&self) -> anyhow::Result<Vec<String>>;
    fn read(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn write(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()>;
    /// Returns false when nothing was stored under `id`.
    fn remove(&self, id: &str) -> anyhow::Result<bool>;
}

#[derive(Default)]
pub struct MemoryBackend {
    records: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryBackend {
    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl RecordBackend for MemoryBackend {
    fn list_ids(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.records().keys().cloned().collect())
    }

    fn read(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.records().get(id).cloned())
    }

    fn write(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        self.records().insert(id.to_string(), bytes.to_vec());
        Ok(())
    }

    fn remove(&self, id: &str) -> anyhow::Result<bool> {
        Ok(self.records().remove(id).is_some())
    }
}

/// One MessagePack file per record inside `dir`.
pub struct FileBackend {
    dir: PathBuf,
}

impl FileBackend {
    pub fn new(dir: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("creating record directory {}", dir.display()))?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        let file: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{}.{}", file, RECORD_EXTENSION))
    }
}

impl RecordBackend for FileBackend {
    fn list_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut ids = Vec::new();
        let entries = fs::read_dir(&self.dir)
            .with_context(|| format!("listing {}", self.dir.display()))?;
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.push(stem.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn read(&self, id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        Ok(Some(bytes))
    }

    fn write(&self, id: &str, bytes: &[u8]) -> anyhow::Result<()> {
        let path = self.path_for(id);
        let staging = path.with_extension("tmp");
        fs::write(&staging, bytes).with_context(|| format!("writing {}", staging.display()))?;
        fs::rename(&staging, &path).with_context(|| format!("replacing {}", path.display()))?;
        Ok(())
    }

    fn remove(&self, id: &str) -> anyhow::Result<bool> {
        let path = self.path_for(id);
        if !path.exists() {
            return Ok(false);
        }
        fs::remove_file(&path).with_context(|| format!("removing {}", path.display()))?;
        Ok(true)
    }
}

pub struct LocalChallengeStore {
    backend: Box<dyn RecordBackend>,
    write_lock: Mutex<()>,
}

impl LocalChallengeStore {
    pub fn new(backend: impl RecordBackend + 'static) -> Self {
        Self {
            backend: Box::new(backend),
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryBackend::default())
    }

    /// Every record, oldest first.
    pub fn list(&self) -> Result<Vec<LocalRecord>, LocalStoreError> {
        let mut records = Vec::new();
        for id in self.backend.list_ids()? {
            if let Some(bytes) = self.backend.read(&id)? {
                records.push(rmp_serde::from_slice::<LocalRecord>(&bytes)?);
            }
        }
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    pub fn get(&self, id: &str) -> Result<LocalRecord, LocalStoreError> {
        let bytes = self
            .backend
            .read(id)?
            .ok_or_else(|| LocalStoreError::NotFound(id.to_string()))?;
        Ok(rmp_serde::from_slice(&bytes)?)
    }

    pub fn create(
        &self,
        name: &str,
        requirements: Option<RequirementModel>,
    ) -> Result<LocalRecord, LocalStoreError> {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_GROUP_NAME_LEN {
            return Err(LocalStoreError::Invalid(format!(
                "name must be 1-{} characters",
                MAX_GROUP_NAME_LEN
            )));
        }
        let requirements = requirements.unwrap_or_else(starter_requirements);
        requirements.validate()?;
        let record = LocalRecord {
            id: format!("local-{:016x}", rand::random::<u64>()),
            name: name.to_string(),
            created_at: Utc::now(),
            requirements,
            progress: ProgressMap::new(),
            penalty: None,
        };
        self.save(&record)?;
        info!(id = %record.id, name = %record.name, "created local challenge");
        Ok(record)
    }

    pub fn save(&self, record: &LocalRecord) -> Result<(), LocalStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        self.write_unlocked(record)
    }

    pub fn delete(&self, id: &str) -> Result<(), LocalStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.backend.remove(id)? {
            return Err(LocalStoreError::NotFound(id.to_string()));
        }
        info!(id, "deleted local challenge");
        Ok(())
    }

    /// Load, change and write back one record as a single step.
    pub fn update<T>(
        &self,
        id: &str,
        change: impl FnOnce(&mut LocalRecord) -> Result<T, LocalStoreError>,
    ) -> Result<T, LocalStoreError> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let mut record = self.get(id)?;
        let out = change(&mut record)?;
        self.write_unlocked(&record)?;
        Ok(out)
    }

    fn write_unlocked(&self, record: &LocalRecord) -> Result<(), LocalStoreError> {
        let bytes = rmp_serde::to_vec_named(record)?;
        self.backend.write(&record.id, &bytes)?;
        Ok(())
    }
}

/// Session bootstrap for a local record: one fixed group the user always belongs to.
pub fn local_snapshot(record: &LocalRecord) -> ChallengeSnapshot {
    let mut group = Group::new(LOCAL_GROUP_ID, LOCAL_GROUP_NAME);
    group.member_count = 1;
    group.progress = record.progress.clone();
    if let Some(penalty) = &record.penalty {
        group.active_penalty_text = penalty.text.clone();
        group.penalty_meta = penalty.meta.clone();
    }
    ChallengeSnapshot {
        challenge: Challenge {
            id: record.id.clone(),
            name: record.name.clone(),
            is_local: true,
            topology: Topology::default(),
            requirements: record.requirements.clone(),
            auth: AuthFlags {
                is_logged_in: false,
                is_creator: true,
                is_authorized: true,
            },
            current_user: None,
            penalties: Vec::new(),
        },
        groups: vec![group],
        current_group: Some(LOCAL_GROUP_ID),
        authorized_users: Vec::new(),
        timer: Timer::default(),
    }
}

/// Serves a local session's calls straight from its record.
pub struct LocalTransport {
    store: Arc<LocalChallengeStore>,
}

impl LocalTransport {
    pub fn new(store: Arc<LocalChallengeStore>) -> Self {
        Self { store }
    }

    fn handle(&self, call: ApiCall) -> Result<serde_json::Value, LocalStoreError> {
        match call {
            ApiCall::FetchState { challenge_id } => {
                let record = self.store.get(&challenge_id)?;
                encode(&local_snapshot(&record))
            }
            ApiCall::SetProgress {
                challenge_id,
                group_id,
                key,
                completed,
            } => {
                check_group(group_id)?;
                self.store.update(&challenge_id, |record| {
                    if !record.requirements.contains_raw(&key) {
                        return Err(LocalStoreError::Invalid(format!(
                            "no requirement matches {}",
                            key
                        )));
                    }
                    record.progress.insert(key.clone(), completed);
                    Ok(())
                })?;
                debug!(challenge_id = %challenge_id, key = %key, completed, "local progress saved");
                encode(&ProgressReply {
                    completed: Some(completed),
                })
            }
            ApiCall::SetPenalty {
                challenge_id,
                group_id,
                text,
                duration_seconds,
            } => {
                check_group(group_id)?;
                let meta = duration_seconds.filter(|d| *d > 0).map(|d| PenaltyMeta {
                    duration_seconds: d,
                    applied_at: Utc::now(),
                });
                let meta = if text.is_empty() { None } else { meta };
                self.store.update(&challenge_id, |record| {
                    record.penalty = if text.is_empty() {
                        None
                    } else {
                        Some(LocalPenaltyInfo {
                            text: text.clone(),
                            meta: meta.clone(),
                        })
                    };
                    Ok(())
                })?;
                encode(&PenaltyReply { text, meta })
            }
            other => Err(LocalStoreError::Invalid(format!(
                "{} is not available for local challenges",
                other.endpoint()
            ))),
        }
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn call(&self, call: ApiCall) -> Result<serde_json::Value, RemoteError> {
        self.handle(call).map_err(RemoteError::from)
    }
}

fn check_group(group_id: GroupId) -> Result<(), LocalStoreError> {
    if group_id == LOCAL_GROUP_ID {
        Ok(())
    } else {
        Err(LocalStoreError::NotFound(format!("group {}", group_id)))
    }
}

fn encode<T: Serialize>(value: &T) -> Result<serde_json::Value, LocalStoreError> {
    serde_json::to_value(value).map_err(|e| LocalStoreError::Invalid(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_backend_round_trips_whole_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = LocalChallengeStore::new(FileBackend::new(dir.path()).unwrap());
        let record = store.create("  Solo run ", None).unwrap();
        assert_eq!(record.name, "Solo run");

        let mut changed = store.get(&record.id).unwrap();
        changed.progress.insert("normal_SpeedRun_0".into(), true);
        store.save(&changed).unwrap();

        let reopened = LocalChallengeStore::new(FileBackend::new(dir.path()).unwrap());
        let listed = reopened.list().unwrap();
        assert_eq!(listed, vec![changed]);

        reopened.delete(&record.id).unwrap();
        assert!(reopened.list().unwrap().is_empty());
        assert!(matches!(
            reopened.delete(&record.id),
            Err(LocalStoreError::NotFound(_))
        ));
    }

    #[test]
    fn file_names_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FileBackend::new(dir.path()).unwrap();
        backend.write("../escape", b"x").unwrap();
        assert!(dir.path().join("___escape.msgpack").exists());
    }

    #[test]
    fn create_rejects_bad_input() {
        let store = LocalChallengeStore::in_memory();
        assert!(matches!(
            store.create("   ", None),
            Err(LocalStoreError::Invalid(_))
        ));
        let mut requirements = starter_requirements();
        requirements.segments[0].length = 0;
        assert!(matches!(
            store.create("ok", Some(requirements)),
            Err(LocalStoreError::InvalidRequirements(_))
        ));
    }

    #[tokio::test]
    async fn local_transport_persists_progress_and_penalty() {
        let store = Arc::new(LocalChallengeStore::in_memory());
        let record = store.create("Solo", None).unwrap();
        let transport = LocalTransport::new(store.clone());

        transport
            .call(ApiCall::SetProgress {
                challenge_id: record.id.clone(),
                group_id: LOCAL_GROUP_ID,
                key: "normal_SpeedRun_0".into(),
                completed: true,
            })
            .await
            .unwrap();
        transport
            .call(ApiCall::SetPenalty {
                challenge_id: record.id.clone(),
                group_id: LOCAL_GROUP_ID,
                text: "Participant receives penalty: Sing".into(),
                duration_seconds: Some(60),
            })
            .await
            .unwrap();

        let saved = store.get(&record.id).unwrap();
        assert_eq!(saved.progress.get("normal_SpeedRun_0"), Some(&true));
        let penalty = saved.penalty.unwrap();
        assert_eq!(penalty.meta.unwrap().duration_seconds, 60);

        let rejected = transport
            .call(ApiCall::SetProgress {
                challenge_id: record.id.clone(),
                group_id: LOCAL_GROUP_ID,
                key: "normal_Unknown_0".into(),
                completed: true,
            })
            .await
            .unwrap_err();
        assert_eq!(rejected.status, 400);

        let unsupported = transport
            .call(ApiCall::JoinGroup {
                challenge_id: record.id.clone(),
                group_id: LOCAL_GROUP_ID,
            })
            .await
            .unwrap_err();
        assert_eq!(unsupported.status, 400);
    }

    #[test]
    fn snapshot_places_user_in_singleton_group() {
        let mut record = LocalChallengeStore::in_memory().create("Solo", None).unwrap();
        record.penalty = Some(LocalPenaltyInfo {
            text: "Participant receives penalty: Sing".into(),
            meta: None,
        });
        let snapshot = local_snapshot(&record);
        assert_eq!(snapshot.groups.len(), 1);
        assert_eq!(snapshot.current_group, Some(LOCAL_GROUP_ID));
        assert!(snapshot.groups[0].has_penalty());
    }
}
