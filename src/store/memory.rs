use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{
    credential_key, OnboardingRecord, ProfileStore, Project, StoreError, StoreResult, StoredCredential, Ticket,
    TicketComment, TicketStatus, WorkStore,
};
use crate::identity::{ProfilePatch, UserProfile};

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    #[serde(default)]
    profiles: BTreeMap<String, UserProfile>,
    #[serde(default)]
    onboarding: BTreeMap<String, OnboardingRecord>,
    /// Keyed by lower-cased e-mail.
    #[serde(default)]
    credentials: BTreeMap<String, StoredCredential>,
    #[serde(default)]
    projects: BTreeMap<String, Project>,
    #[serde(default)]
    tickets: BTreeMap<String, Ticket>,
}

/// In-memory profile store with an optional JSON snapshot on disk.
#[derive(Clone, Default)]
pub struct MemoryProfileStore {
    data: Arc<RwLock<Snapshot>>,
    path: Option<PathBuf>,
}

impl MemoryProfileStore {
    pub fn new() -> Self { Self::default() }

    /// Open a store mirrored to `path`, loading it if it already exists.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snap = if path.exists() {
            let bytes = std::fs::read(&path)?;
            serde_json::from_slice::<Snapshot>(&bytes)?
        } else {
            Snapshot::default()
        };
        info!(
            target: "store",
            "profile store opened path={} profiles={} credentials={} tickets={}",
            path.display(),
            snap.profiles.len(),
            snap.credentials.len(),
            snap.tickets.len()
        );
        Ok(Self { data: Arc::new(RwLock::new(snap)), path: Some(path) })
    }

    pub fn path(&self) -> Option<&Path> { self.path.as_deref() }

    /// Write `snap` to a uniquely named sibling file, then rename it over the
    /// snapshot. Callers hold the write lock, so snapshots land in order.
    fn flush(&self, snap: &Snapshot) -> StoreResult<()> {
        let Some(path) = &self.path else { return Ok(()); };
        if let Some(dir) = path.parent() { std::fs::create_dir_all(dir)?; }
        let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("snapshot");
        let tmp = path.with_file_name(format!("{}.{}.tmp", name, uuid::Uuid::new_v4().simple()));
        let bytes = serde_json::to_vec_pretty(snap)?;
        if let Err(e) = std::fs::write(&tmp, bytes).and_then(|_| std::fs::rename(&tmp, path)) {
            let _ = std::fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(target: "store", "snapshot flushed path={}", path.display());
        Ok(())
    }

    /// Apply `f` and flush the snapshot, all under the write lock. The
    /// in-memory change stands even if the flush fails; the error is still
    /// returned.
    fn write_with<T>(&self, f: impl FnOnce(&mut Snapshot) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self.data.write();
        let out = f(&mut *guard)?;
        self.flush(&guard)?;
        Ok(out)
    }
}

#[async_trait]
impl ProfileStore for MemoryProfileStore {
    async fn get(&self, uid: &str) -> StoreResult<Option<UserProfile>> {
        Ok(self.data.read().profiles.get(uid).cloned())
    }

    async fn put(&self, profile: UserProfile) -> StoreResult<()> {
        self.write_with(|s| {
            s.profiles.insert(profile.id.clone(), profile);
            Ok(())
        })
    }

    async fn update(&self, uid: &str, patch: ProfilePatch) -> StoreResult<UserProfile> {
        self.write_with(|s| {
            let profile = s.profiles.get_mut(uid).ok_or_else(|| StoreError::NotFound(uid.to_string()))?;
            patch.apply(profile);
            Ok(profile.clone())
        })
    }

    async fn list(&self) -> StoreResult<Vec<UserProfile>> {
        Ok(self.data.read().profiles.values().cloned().collect())
    }

    async fn save_onboarding(&self, record: OnboardingRecord) -> StoreResult<()> {
        self.write_with(|s| {
            s.onboarding.insert(record.user_id.clone(), record);
            Ok(())
        })
    }

    async fn onboarding(&self, uid: &str) -> StoreResult<Option<OnboardingRecord>> {
        Ok(self.data.read().onboarding.get(uid).cloned())
    }

    async fn credential(&self, email: &str) -> StoreResult<Option<StoredCredential>> {
        Ok(self.data.read().credentials.get(&credential_key(email)).cloned())
    }

    async fn insert_credential(&self, cred: StoredCredential) -> StoreResult<bool> {
        self.write_with(|s| {
            let key = credential_key(&cred.email);
            if s.credentials.contains_key(&key) {
                return Ok(false);
            }
            s.credentials.insert(key, cred);
            Ok(true)
        })
    }
}

#[async_trait]
impl WorkStore for MemoryProfileStore {
    async fn put_project(&self, project: Project) -> StoreResult<()> {
        self.write_with(|s| {
            s.projects.insert(project.id.clone(), project);
            Ok(())
        })
    }

    async fn list_projects(&self) -> StoreResult<Vec<Project>> {
        Ok(self.data.read().projects.values().cloned().collect())
    }

    async fn put_ticket(&self, ticket: Ticket) -> StoreResult<()> {
        self.write_with(|s| {
            s.tickets.insert(ticket.id.clone(), ticket);
            Ok(())
        })
    }

    async fn ticket(&self, id: &str) -> StoreResult<Option<Ticket>> {
        Ok(self.data.read().tickets.get(id).cloned())
    }

    async fn list_tickets(&self) -> StoreResult<Vec<Ticket>> {
        let mut tickets: Vec<Ticket> = self.data.read().tickets.values().cloned().collect();
        tickets.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tickets)
    }

    async fn add_comment(&self, ticket_id: &str, comment: TicketComment) -> StoreResult<Ticket> {
        self.write_with(|s| {
            let t = s.tickets.get_mut(ticket_id).ok_or_else(|| StoreError::TicketNotFound(ticket_id.to_string()))?;
            t.comments.push(comment);
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }

    async fn set_ticket_status(&self, ticket_id: &str, status: TicketStatus) -> StoreResult<Ticket> {
        self.write_with(|s| {
            let t = s.tickets.get_mut(ticket_id).ok_or_else(|| StoreError::TicketNotFound(ticket_id.to_string()))?;
            t.status = status;
            t.updated_at = Utc::now();
            Ok(t.clone())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Role;
    use crate::store::{OnboardingAnswers, TicketPriority};

    fn ticket(id: &str, user: &str) -> Ticket {
        let now = Utc::now();
        Ticket {
            id: id.into(),
            user_id: user.into(),
            title: "Hero image stretched".into(),
            description: "Looks wrong on mobile".into(),
            status: TicketStatus::Open,
            priority: TicketPriority::Medium,
            comments: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn get_put_update() {
        let store = MemoryProfileStore::new();
        assert!(store.get("u1").await.unwrap().is_none());
        store.put(UserProfile::new("u1", "a@b.test", "Ann", Role::Client)).await.unwrap();
        let p = store
            .update("u1", ProfilePatch { onboarding_complete: Some(true), ..Default::default() })
            .await
            .unwrap();
        assert!(p.onboarding_complete);
        assert!(store.get("u1").await.unwrap().unwrap().onboarding_complete);
    }

    #[tokio::test]
    async fn update_missing_profile_is_not_found() {
        let store = MemoryProfileStore::new();
        let err = store.update("ghost", ProfilePatch::default()).await.unwrap_err();
        assert!(matches!(err, StoreError::NotFound(uid) if uid == "ghost"));
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("data").join("profiles.json");
        {
            let store = MemoryProfileStore::open(&path).unwrap();
            store.put(UserProfile::new("u1", "a@b.test", "Ann", Role::Client)).await.unwrap();
            store
                .save_onboarding(OnboardingRecord {
                    user_id: "u1".into(),
                    answers: OnboardingAnswers { business_name: "Ann's Plumbing".into(), ..Default::default() },
                    completed_at: chrono::Utc::now(),
                })
                .await
                .unwrap();
            store.insert_credential(StoredCredential::new("A@B.test", "u1", "$argon2id$stub")).await.unwrap();
            store.put_ticket(ticket("T-1", "u1")).await.unwrap();
        }
        let reopened = MemoryProfileStore::open(&path).unwrap();
        assert_eq!(reopened.get("u1").await.unwrap().map(|p| p.name), Some("Ann".into()));
        let rec = reopened.onboarding("u1").await.unwrap().unwrap();
        assert_eq!(rec.answers.business_name, "Ann's Plumbing");
        assert_eq!(reopened.list().await.unwrap().len(), 1);
        let cred = reopened.credential("a@b.test").await.unwrap().unwrap();
        assert_eq!(cred.user_id, "u1");
        assert_eq!(reopened.ticket("T-1").await.unwrap().map(|t| t.user_id), Some("u1".into()));
    }

    #[test]
    fn corrupt_snapshot_is_a_data_error() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        std::fs::write(&path, b"{not json").unwrap();
        assert!(matches!(MemoryProfileStore::open(&path), Err(StoreError::Serde(_))));
    }

    #[tokio::test]
    async fn older_snapshot_without_new_tables_loads() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        std::fs::write(&path, br#"{"profiles": {}, "onboarding": {}}"#).unwrap();
        let store = MemoryProfileStore::open(&path).unwrap();
        assert!(store.credential("a@b.test").await.unwrap().is_none());
        assert!(store.list_tickets().await.unwrap().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_puts_all_reach_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("profiles.json");
        let store = Arc::new(MemoryProfileStore::open(&path).unwrap());

        let mut handles = Vec::new();
        for i in 0..64 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let uid = format!("u{}", i);
                store.put(UserProfile::new(uid.clone(), format!("{}@shop.test", uid), "Client", Role::Client)).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let reopened = MemoryProfileStore::open(&path).unwrap();
        assert_eq!(reopened.list().await.unwrap().len(), 64);
        let leftovers: Vec<_> = std::fs::read_dir(tmp.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn credential_insert_is_first_wins() {
        let store = MemoryProfileStore::new();
        assert!(store.insert_credential(StoredCredential::new("Ann@Shop.test", "u1", "phc-1")).await.unwrap());
        assert!(!store.insert_credential(StoredCredential::new("ann@shop.test ", "u2", "phc-2")).await.unwrap());
        assert_eq!(store.credential("ANN@shop.test").await.unwrap().map(|c| c.user_id), Some("u1".into()));
    }

    #[tokio::test]
    async fn ticket_comments_and_status() {
        let store = MemoryProfileStore::new();
        store.put_ticket(ticket("T-1", "u1")).await.unwrap();
        let comment = TicketComment {
            id: "c1".into(),
            message: "Looking into the media queries".into(),
            is_staff_reply: true,
            author_name: "Support Team".into(),
            created_at: Utc::now(),
        };
        let t = store.add_comment("T-1", comment).await.unwrap();
        assert_eq!(t.comments.len(), 1);
        let t = store.set_ticket_status("T-1", TicketStatus::Completed).await.unwrap();
        assert!(!t.status.is_open());
        assert!(matches!(
            store.set_ticket_status("T-404", TicketStatus::Open).await,
            Err(StoreError::TicketNotFound(id)) if id == "T-404"
        ));
    }
}
