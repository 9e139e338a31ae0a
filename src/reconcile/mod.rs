//! Drift between the mirror and the database.

use std::collections::HashSet;

use sea_orm::{ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QuerySelect};
use serde::Serialize;
use tracing::info;

use crate::entities::{activity, enrollment, session};
use crate::mirror::{Mirror, MirrorRemoval, MirroredActivity, MirroredSession};

pub mod cascade;
pub mod ghosts;

use ghosts::{Ghosts, detect_ghosts};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrphanPermission {
    pub member_id: String,
    pub activity_id: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub activities: Ghosts,
    pub sessions: Ghosts,
    /// Calendar entries whose activity or session no longer exists.
    pub orphan_calendar_entries: Vec<String>,
    /// Permission entries without a matching enrollment.
    pub orphan_permissions: Vec<OrphanPermission>,
}

impl ReconcileReport {
    pub fn is_clean(&self) -> bool {
        self.activities.is_empty()
            && self.sessions.is_empty()
            && self.orphan_calendar_entries.is_empty()
            && self.orphan_permissions.is_empty()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeReport {
    pub removed: MirrorRemoval,
    pub refreshed_activities: usize,
    pub refreshed_sessions: usize,
    pub duplicates_collapsed: usize,
}

async fn ids<E, C>(db: &C, column: E::Column) -> Result<Vec<String>, DbErr>
where
    E: EntityTrait,
    C: ConnectionTrait,
{
    E::find()
        .select_only()
        .column(column)
        .into_tuple::<String>()
        .all(db)
        .await
}

pub async fn scan<C: ConnectionTrait>(db: &C, mirror: &Mirror) -> Result<ReconcileReport, DbErr> {
    let activity_ids = ids::<activity::Entity, _>(db, activity::Column::Id).await?;
    let session_ids = ids::<session::Entity, _>(db, session::Column::Id).await?;
    let enrollments: HashSet<(String, String)> = enrollment::Entity::find()
        .select_only()
        .column(enrollment::Column::MemberId)
        .column(enrollment::Column::ActivityId)
        .into_tuple::<(String, String)>()
        .all(db)
        .await?
        .into_iter()
        .collect();

    let local_activities = mirror.activities();
    let local_sessions = mirror.sessions();

    let activities = detect_ghosts(local_activities.iter().map(|a| &a.id), &activity_ids);
    let sessions = detect_ghosts(local_sessions.iter().map(|s| &s.id), &session_ids);

    let known_activities: HashSet<&str> = activity_ids.iter().map(String::as_str).collect();
    let known_sessions: HashSet<&str> = session_ids.iter().map(String::as_str).collect();

    let orphan_calendar_entries = mirror
        .calendar_entries()
        .into_iter()
        .filter(|entry| {
            let activity_gone = entry
                .activity_id
                .as_deref()
                .is_some_and(|id| !known_activities.contains(id));
            let session_gone = entry
                .session_id
                .as_deref()
                .is_some_and(|id| !known_sessions.contains(id));
            activity_gone || session_gone
        })
        .map(|entry| entry.id)
        .collect();

    let orphan_permissions = mirror
        .permissions()
        .into_iter()
        .filter(|p| !enrollments.contains(&(p.member_id.clone(), p.activity_id.clone())))
        .map(|p| OrphanPermission {
            member_id: p.member_id,
            activity_id: p.activity_id,
        })
        .collect();

    Ok(ReconcileReport {
        activities,
        sessions,
        orphan_calendar_entries,
        orphan_permissions,
    })
}

/// Brings the mirror back in line with the database: local-only records are
/// dropped, remote-only records are mirrored.
pub async fn purge<C: ConnectionTrait>(db: &C, mirror: &Mirror) -> Result<PurgeReport, DbErr> {
    let scan = scan(db, mirror).await?;
    let mut report = PurgeReport::default();

    for id in &scan.activities.local_only {
        report.removed += mirror.remove_activity(id);
    }
    for id in &scan.sessions.local_only {
        report.removed += mirror.remove_session(id);
    }
    report.removed.calendar_entries += mirror.remove_calendar_entries(&scan.orphan_calendar_entries);
    for orphan in &scan.orphan_permissions {
        report.removed.permissions += mirror.remove_permission(&orphan.member_id, &orphan.activity_id);
    }

    if !scan.activities.remote_only.is_empty() {
        let missing = activity::Entity::find()
            .filter(activity::Column::Id.is_in(scan.activities.remote_only.clone()))
            .all(db)
            .await?;
        report.refreshed_activities = missing.len();
        mirror.upsert_activities(missing.iter().map(MirroredActivity::from).collect());
    }

    if !scan.sessions.remote_only.is_empty() {
        let missing = session::Entity::find()
            .filter(session::Column::Id.is_in(scan.sessions.remote_only.clone()))
            .all(db)
            .await?;
        report.refreshed_sessions = missing.len();
        for model in &missing {
            mirror.upsert_session(MirroredSession::from(model));
        }
    }

    report.duplicates_collapsed = mirror.compact_calendar();

    info!("Mirror purge finished: {:?}", report);
    Ok(report)
}
