//! Best-effort cache of activities, sessions, calendar entries, permissions
//! and covers.
//!
//! The database stays authoritative. Every read here tolerates missing or
//! corrupt keys and every write swallows store failures after logging them,
//! so callers never fail because the mirror did.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, warn};

use crate::entities::{activity, enrollment::EnrollmentRole, session};

pub mod merge;
pub mod store;

use merge::{dedup_by_key, merge_by_key};
pub use store::{FileStore, KeyValueStore, MemoryStore, MirrorError};

pub const ACTIVITIES_KEY: &str = "activities_v2";
pub const SESSIONS_KEY: &str = "sessions_v2";
pub const CALENDAR_KEY: &str = "calendar_entries_v2";
pub const PERMISSIONS_KEY: &str = "permissions_v2";
pub const COVER_PREFIX: &str = "activity_cover:";

/// Unversioned keys written by older clients and where their data now lives.
pub const LEGACY_KEYS: [(&str, &str); 4] = [
    ("activities", ACTIVITIES_KEY),
    ("sessions", SESSIONS_KEY),
    ("calendar_entries", CALENDAR_KEY),
    ("permissions", PERMISSIONS_KEY),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredActivity {
    pub id: String,
    pub name: String,
    pub kind: activity::ActivityKind,
    #[serde(default)]
    pub starts_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub ends_at: Option<NaiveDateTime>,
    #[serde(default)]
    pub archived: bool,
}

impl From<&activity::Model> for MirroredActivity {
    fn from(model: &activity::Model) -> Self {
        Self {
            id: model.id.clone(),
            name: model.name.clone(),
            kind: model.kind,
            starts_at: model.starts_at,
            ends_at: model.ends_at,
            archived: model.archived,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirroredSession {
    pub id: String,
    pub activity_id: String,
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub target_member_ids: Vec<String>,
}

impl From<&session::Model> for MirroredSession {
    fn from(model: &session::Model) -> Self {
        Self {
            id: model.id.clone(),
            activity_id: model.activity_id.clone(),
            title: model.title.clone(),
            starts_at: model.starts_at,
            ends_at: model.ends_at,
            location: model.location.clone(),
            target_member_ids: model.targets(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalendarSource {
    Session,
    Activity,
}

/// Per-member projection of a session or activity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEntry {
    pub id: String,
    pub member_id: String,
    #[serde(default)]
    pub activity_id: Option<String>,
    #[serde(default)]
    pub session_id: Option<String>,
    pub title: String,
    pub starts_at: NaiveDateTime,
    pub ends_at: NaiveDateTime,
    pub source: CalendarSource,
}

impl CalendarEntry {
    pub fn for_session(session: &MirroredSession, member_id: &str) -> Self {
        Self {
            id: format!("{}:{}", session.id, member_id),
            member_id: member_id.to_string(),
            activity_id: Some(session.activity_id.clone()),
            session_id: Some(session.id.clone()),
            title: session.title.clone(),
            starts_at: session.starts_at,
            ends_at: session.ends_at,
            source: CalendarSource::Session,
        }
    }

    fn references_activity(&self, activity_id: &str) -> bool {
        self.activity_id.as_deref() == Some(activity_id)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    pub member_id: String,
    pub activity_id: String,
    pub role: EnrollmentRole,
}

/// What a removal took out of the mirror.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MirrorRemoval {
    pub activities: usize,
    pub covers: usize,
    pub sessions: usize,
    pub calendar_entries: usize,
    pub permissions: usize,
}

impl MirrorRemoval {
    pub fn total(&self) -> usize {
        self.activities + self.covers + self.sessions + self.calendar_entries + self.permissions
    }
}

impl std::ops::AddAssign for MirrorRemoval {
    fn add_assign(&mut self, other: Self) {
        self.activities += other.activities;
        self.covers += other.covers;
        self.sessions += other.sessions;
        self.calendar_entries += other.calendar_entries;
        self.permissions += other.permissions;
    }
}

#[derive(Clone)]
pub struct Mirror {
    store: Arc<dyn KeyValueStore>,
}

impl std::fmt::Debug for Mirror {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mirror").finish_non_exhaustive()
    }
}

impl Mirror {
    pub fn new(store: impl KeyValueStore + 'static) -> Self {
        Self {
            store: Arc::new(store),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(MemoryStore::new())
    }

    fn read<T: DeserializeOwned>(&self, key: &str) -> Vec<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Mirror read of {key} failed: {e}");
                return Vec::new();
            }
        };

        serde_json::from_str(&raw).unwrap_or_else(|e| {
            warn!("Mirror key {key} holds unreadable data, treating as empty: {e}");
            Vec::new()
        })
    }

    fn write<T: Serialize>(&self, key: &str, items: &[T]) {
        let raw = match serde_json::to_string(items) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Mirror serialization of {key} failed: {e}");
                return;
            }
        };

        if let Err(e) = self.store.set(key, raw) {
            warn!("Mirror write of {key} failed: {e}");
        }
    }

    fn remove_key(&self, key: &str) -> bool {
        match self.store.remove(key) {
            Ok(()) => true,
            Err(e) => {
                warn!("Mirror removal of {key} failed: {e}");
                false
            }
        }
    }

    /// Keeps records matching `keep`, returns how many were dropped.
    fn retain<T, F>(&self, key: &str, keep: F) -> usize
    where
        T: Serialize + DeserializeOwned,
        F: Fn(&T) -> bool,
    {
        let items: Vec<T> = self.read(key);
        let before = items.len();
        let kept: Vec<T> = items.into_iter().filter(|item| keep(item)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write(key, &kept);
        }
        removed
    }

    pub fn keys(&self) -> Vec<String> {
        self.store.keys().unwrap_or_else(|e| {
            warn!("Mirror key listing failed: {e}");
            Vec::new()
        })
    }

    pub fn activities(&self) -> Vec<MirroredActivity> {
        self.read(ACTIVITIES_KEY)
    }

    pub fn upsert_activity(&self, activity: MirroredActivity) {
        let merged = merge_by_key(self.activities(), vec![activity], |a| a.id.clone());
        self.write(ACTIVITIES_KEY, &merged);
    }

    pub fn upsert_activities(&self, activities: Vec<MirroredActivity>) {
        let merged = merge_by_key(self.activities(), activities, |a| a.id.clone());
        self.write(ACTIVITIES_KEY, &merged);
    }

    pub fn cover(&self, activity_id: &str) -> Option<String> {
        let key = format!("{COVER_PREFIX}{activity_id}");
        match self.store.get(&key) {
            Ok(raw) => raw,
            Err(e) => {
                warn!("Mirror read of {key} failed: {e}");
                None
            }
        }
    }

    pub fn set_cover(&self, activity_id: &str, cover: &str) {
        let key = format!("{COVER_PREFIX}{activity_id}");
        if let Err(e) = self.store.set(&key, cover.to_string()) {
            warn!("Mirror write of {key} failed: {e}");
        }
    }

    pub fn sessions(&self) -> Vec<MirroredSession> {
        self.read(SESSIONS_KEY)
    }

    /// Stores the session and re-projects its calendar entries: targets that
    /// were dropped since the last write lose their entry.
    pub fn upsert_session(&self, session: MirroredSession) {
        let entries: Vec<CalendarEntry> = session
            .target_member_ids
            .iter()
            .map(|member_id| CalendarEntry::for_session(&session, member_id))
            .collect();

        let session_id = session.id.clone();
        let merged = merge_by_key(self.sessions(), vec![session], |s| s.id.clone());
        self.write(SESSIONS_KEY, &merged);

        let others: Vec<CalendarEntry> = self
            .calendar_entries()
            .into_iter()
            .filter(|e| e.session_id.as_deref() != Some(session_id.as_str()))
            .collect();
        let calendar = merge_by_key(others, entries, |e| e.id.clone());
        self.write(CALENDAR_KEY, &calendar);
    }

    pub fn remove_session(&self, session_id: &str) -> MirrorRemoval {
        MirrorRemoval {
            sessions: self.retain(SESSIONS_KEY, |s: &MirroredSession| s.id != session_id),
            calendar_entries: self.retain(CALENDAR_KEY, |e: &CalendarEntry| {
                e.session_id.as_deref() != Some(session_id)
            }),
            ..Default::default()
        }
    }

    pub fn calendar_entries(&self) -> Vec<CalendarEntry> {
        self.read(CALENDAR_KEY)
    }

    pub fn calendar_for_member(&self, member_id: &str) -> Vec<CalendarEntry> {
        let mut entries: Vec<CalendarEntry> = self
            .calendar_entries()
            .into_iter()
            .filter(|e| e.member_id == member_id)
            .collect();
        entries.sort_by_key(|e| e.starts_at);
        entries
    }

    pub fn remove_calendar_entries(&self, ids: &[String]) -> usize {
        self.retain(CALENDAR_KEY, |e: &CalendarEntry| !ids.contains(&e.id))
    }

    pub fn permissions(&self) -> Vec<PermissionEntry> {
        self.read(PERMISSIONS_KEY)
    }

    pub fn upsert_permission(&self, permission: PermissionEntry) {
        let merged = merge_by_key(self.permissions(), vec![permission], |p| {
            (p.member_id.clone(), p.activity_id.clone())
        });
        self.write(PERMISSIONS_KEY, &merged);
    }

    pub fn remove_permission(&self, member_id: &str, activity_id: &str) -> usize {
        self.retain(PERMISSIONS_KEY, |p: &PermissionEntry| {
            !(p.member_id == member_id && p.activity_id == activity_id)
        })
    }

    /// Drops every mirrored copy that belongs to or references the activity.
    pub fn remove_activity(&self, activity_id: &str) -> MirrorRemoval {
        let cover_key = format!("{COVER_PREFIX}{activity_id}");
        let covers = match self.store.get(&cover_key) {
            Ok(Some(_)) => usize::from(self.remove_key(&cover_key)),
            _ => 0,
        };

        let removal = MirrorRemoval {
            activities: self.retain(ACTIVITIES_KEY, |a: &MirroredActivity| a.id != activity_id),
            covers,
            sessions: self.retain(SESSIONS_KEY, |s: &MirroredSession| {
                s.activity_id != activity_id
            }),
            calendar_entries: self.retain(CALENDAR_KEY, |e: &CalendarEntry| {
                !e.references_activity(activity_id)
            }),
            permissions: self.retain(PERMISSIONS_KEY, |p: &PermissionEntry| {
                p.activity_id != activity_id
            }),
        };
        debug!("Removed activity {activity_id} from mirror: {:?}", removal);
        removal
    }

    /// Drops the member's calendar entries and permissions and takes them off
    /// session target lists.
    pub fn remove_member(&self, member_id: &str) -> MirrorRemoval {
        let sessions: Vec<MirroredSession> = self.sessions();
        let touched = sessions
            .iter()
            .filter(|s| s.target_member_ids.iter().any(|m| m == member_id))
            .count();
        if touched > 0 {
            let updated: Vec<MirroredSession> = sessions
                .into_iter()
                .map(|mut s| {
                    s.target_member_ids.retain(|m| m != member_id);
                    s
                })
                .collect();
            self.write(SESSIONS_KEY, &updated);
        }

        MirrorRemoval {
            calendar_entries: self.retain(CALENDAR_KEY, |e: &CalendarEntry| {
                e.member_id != member_id
            }),
            permissions: self.retain(PERMISSIONS_KEY, |p: &PermissionEntry| {
                p.member_id != member_id
            }),
            sessions: touched,
            ..Default::default()
        }
    }

    /// Folds unversioned legacy keys into their current keys and deletes
    /// them. Returns the number of legacy keys folded.
    pub fn migrate_legacy(&self) -> usize {
        let mut migrated = 0;
        for (legacy, current) in LEGACY_KEYS {
            match self.store.get(legacy) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(e) => {
                    warn!("Mirror read of {legacy} failed: {e}");
                    continue;
                }
            }

            match current {
                ACTIVITIES_KEY => {
                    let old: Vec<MirroredActivity> = self.read(legacy);
                    // Current data is newer than anything under a legacy key.
                    let merged = merge_by_key(old, self.activities(), |a| a.id.clone());
                    self.write(current, &merged);
                }
                SESSIONS_KEY => {
                    let old: Vec<MirroredSession> = self.read(legacy);
                    let merged = merge_by_key(old, self.sessions(), |s| s.id.clone());
                    self.write(current, &merged);
                }
                CALENDAR_KEY => {
                    let old: Vec<CalendarEntry> = self.read(legacy);
                    let merged = merge_by_key(old, self.calendar_entries(), |e| e.id.clone());
                    self.write(current, &merged);
                }
                _ => {
                    let old: Vec<PermissionEntry> = self.read(legacy);
                    let merged = merge_by_key(old, self.permissions(), |p| {
                        (p.member_id.clone(), p.activity_id.clone())
                    });
                    self.write(current, &merged);
                }
            }

            if self.remove_key(legacy) {
                migrated += 1;
            }
        }

        if migrated > 0 {
            debug!("Migrated {migrated} legacy mirror keys");
        }
        migrated
    }

    /// Rewrites the calendar with duplicate entry ids collapsed.
    pub fn compact_calendar(&self) -> usize {
        let entries = self.calendar_entries();
        let before = entries.len();
        let deduped = dedup_by_key(entries, |e| e.id.clone());
        let removed = before - deduped.len();
        if removed > 0 {
            self.write(CALENDAR_KEY, &deduped);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    struct FailingStore;

    impl KeyValueStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<String>, MirrorError> {
            Err(MirrorError::Poisoned)
        }

        fn set(&self, _key: &str, _value: String) -> Result<(), MirrorError> {
            Err(MirrorError::Io(std::io::Error::other("disk full")))
        }

        fn remove(&self, _key: &str) -> Result<(), MirrorError> {
            Err(MirrorError::Poisoned)
        }

        fn keys(&self) -> Result<Vec<String>, MirrorError> {
            Err(MirrorError::Poisoned)
        }
    }

    fn at(hour: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 9, 2)
            .unwrap()
            .and_hms_opt(hour, 0, 0)
            .unwrap()
    }

    fn activity(id: &str) -> MirroredActivity {
        MirroredActivity {
            id: id.to_string(),
            name: format!("Activity {id}"),
            kind: activity::ActivityKind::Offer,
            starts_at: None,
            ends_at: None,
            archived: false,
        }
    }

    fn session(id: &str, activity_id: &str, targets: &[&str]) -> MirroredSession {
        MirroredSession {
            id: id.to_string(),
            activity_id: activity_id.to_string(),
            title: format!("Session {id}"),
            starts_at: at(17),
            ends_at: at(19),
            location: None,
            target_member_ids: targets.iter().map(|t| t.to_string()).collect(),
        }
    }

    #[test]
    fn test_failing_store_never_panics() {
        let mirror = Mirror::new(FailingStore);

        mirror.upsert_activity(activity("a1"));
        mirror.upsert_session(session("s1", "a1", &["m1"]));
        mirror.set_cover("a1", "cover.png");
        mirror.upsert_permission(PermissionEntry {
            member_id: "m1".into(),
            activity_id: "a1".into(),
            role: EnrollmentRole::Leader,
        });

        assert!(mirror.activities().is_empty());
        assert!(mirror.keys().is_empty());
        assert_eq!(mirror.remove_activity("a1"), MirrorRemoval::default());
        assert_eq!(mirror.remove_member("m1"), MirrorRemoval::default());
        assert_eq!(mirror.migrate_legacy(), 0);
    }

    #[test]
    fn test_corrupt_key_reads_as_empty() {
        let store = MemoryStore::new();
        store.set(ACTIVITIES_KEY, "{not json".into()).unwrap();
        let mirror = Mirror::new(store);

        assert!(mirror.activities().is_empty());
        mirror.upsert_activity(activity("a1"));
        assert_eq!(mirror.activities().len(), 1);
    }

    #[test]
    fn test_upsert_session_projects_calendar() {
        let mirror = Mirror::in_memory();
        mirror.upsert_session(session("s1", "a1", &["m1", "m2"]));

        assert_eq!(mirror.calendar_for_member("m1").len(), 1);
        assert_eq!(mirror.calendar_for_member("m2").len(), 1);

        // Retargeting drops the old projection.
        mirror.upsert_session(session("s1", "a1", &["m2", "m3"]));
        assert!(mirror.calendar_for_member("m1").is_empty());
        assert_eq!(mirror.calendar_for_member("m3")[0].id, "s1:m3");
        assert_eq!(mirror.sessions().len(), 1);
        assert_eq!(mirror.calendar_entries().len(), 2);
    }

    #[test]
    fn test_remove_activity_clears_everything_referencing_it() {
        let mirror = Mirror::in_memory();
        mirror.upsert_activities(vec![activity("a1"), activity("a2")]);
        mirror.set_cover("a1", "cover.png");
        mirror.upsert_session(session("s1", "a1", &["m1"]));
        mirror.upsert_session(session("s2", "a2", &["m1"]));
        mirror.upsert_permission(PermissionEntry {
            member_id: "m1".into(),
            activity_id: "a1".into(),
            role: EnrollmentRole::Participant,
        });

        let removal = mirror.remove_activity("a1");
        assert_eq!(
            removal,
            MirrorRemoval {
                activities: 1,
                covers: 1,
                sessions: 1,
                calendar_entries: 1,
                permissions: 1,
            }
        );
        assert_eq!(mirror.activities(), vec![activity("a2")]);
        assert_eq!(mirror.cover("a1"), None);
        assert_eq!(mirror.calendar_for_member("m1").len(), 1);

        assert_eq!(mirror.remove_activity("a1").total(), 0);
    }

    #[test]
    fn test_remove_member_untargets_sessions() {
        let mirror = Mirror::in_memory();
        mirror.upsert_session(session("s1", "a1", &["m1", "m2"]));

        mirror.upsert_session(session("s2", "a1", &["m2"]));

        let removal = mirror.remove_member("m1");
        assert_eq!(removal.calendar_entries, 1);
        assert_eq!(removal.sessions, 1);
        let sessions = mirror.sessions();
        let s1 = sessions.iter().find(|s| s.id == "s1").unwrap();
        assert_eq!(s1.target_member_ids, vec!["m2".to_string()]);
    }

    #[test]
    fn test_migrate_legacy_merges_and_drops_old_keys() {
        let store = MemoryStore::new();
        store
            .set(
                "activities",
                serde_json::to_string(&vec![activity("old"), activity("both")]).unwrap(),
            )
            .unwrap();
        let mirror = Mirror::new(store);
        let mut fresh = activity("both");
        fresh.name = "Renamed".into();
        mirror.upsert_activity(fresh);

        assert_eq!(mirror.migrate_legacy(), 1);
        let activities = mirror.activities();
        assert_eq!(activities.len(), 2);
        assert_eq!(
            activities.iter().find(|a| a.id == "both").unwrap().name,
            "Renamed"
        );
        assert!(!mirror.keys().contains(&"activities".to_string()));
        assert_eq!(mirror.migrate_legacy(), 0);
    }
}
