//! Hard deletes that walk dependent collections.
//!
//! Nothing here runs in a transaction. A failure part way through leaves the
//! steps already taken in place and reports which step broke.

use std::collections::BTreeMap;

use sea_orm::{
    ColumnTrait, ConnectionTrait, DbErr, EntityTrait, QueryFilter,
    sea_query::{Alias, Expr, Query},
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::entities::{activity, member, session};
use crate::mirror::{Mirror, MirrorRemoval};
use crate::storage::{FileStorage, StorageError};

#[derive(Debug, thiserror::Error)]
pub enum CascadeError {
    #[error("Deleting {collection} failed: {source}")]
    Dependent {
        collection: &'static str,
        #[source]
        source: DbErr,
    },

    #[error("Removing activity files failed: {0}")]
    Files(#[source] StorageError),

    #[error("Deleting the {0} row failed: {1}")]
    Root(&'static str, #[source] DbErr),
}

/// A table holding rows that point at the record being deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dependent {
    pub collection: &'static str,
    pub column: &'static str,
}

const fn dependent(collection: &'static str, column: &'static str) -> Dependent {
    Dependent { collection, column }
}

#[derive(Debug, Clone, Copy)]
enum Step {
    Rows(Dependent),
    Files,
}

const ACTIVITY_STEPS: [Step; 8] = [
    Step::Rows(dependent("enrollment", "activity_id")),
    Step::Rows(dependent("session", "activity_id")),
    Step::Rows(dependent("message", "activity_id")),
    Step::Files,
    Step::Rows(dependent("guest_child", "activity_id")),
    Step::Rows(dependent("guest", "activity_id")),
    Step::Rows(dependent("volunteer", "activity_id")),
    Step::Rows(dependent("task", "activity_id")),
];

/// Rows deleted outright when a member is hard deleted.
const MEMBER_DELETES: [Dependent; 1] = [dependent("enrollment", "member_id")];

/// Rows that keep living with their member link cleared.
const MEMBER_DETACHES: [Dependent; 3] = [
    dependent("volunteer", "member_id"),
    dependent("task", "assigned_member_id"),
    dependent("user", "member_id"),
];

#[derive(Debug, Clone, Default, Serialize)]
pub struct CascadeReport {
    pub id: String,
    /// Rows touched per collection.
    pub removed: BTreeMap<&'static str, u64>,
    /// Collections missing from the deployed schema.
    pub skipped: Vec<&'static str>,
    pub files_removed: usize,
    /// False when the root row was already gone.
    pub root_removed: bool,
    pub mirror: MirrorRemoval,
}

/// Matches "table/column does not exist" across the backends we run on.
pub fn is_missing_relation(err: &DbErr) -> bool {
    let message = err.to_string().to_lowercase();
    [
        "no such table",
        "no such column",
        "does not exist",
        "undefined_table",
        "undefined_column",
        "42p01",
        "42703",
    ]
    .iter()
    .any(|needle| message.contains(needle))
}

/// Runs one statement against a dependent collection. `Ok(None)` means the
/// collection is not deployed.
async fn run_tolerant<C: ConnectionTrait>(
    db: &C,
    dep: Dependent,
    statement: sea_orm::Statement,
) -> Result<Option<u64>, CascadeError> {
    match db.execute(statement).await {
        Ok(result) => Ok(Some(result.rows_affected())),
        Err(e) if is_missing_relation(&e) => {
            warn!("Skipping {}.{}: {}", dep.collection, dep.column, e);
            Ok(None)
        }
        Err(source) => Err(CascadeError::Dependent {
            collection: dep.collection,
            source,
        }),
    }
}

async fn delete_rows<C: ConnectionTrait>(
    db: &C,
    dep: Dependent,
    id: &str,
    report: &mut CascadeReport,
) -> Result<(), CascadeError> {
    let statement = Query::delete()
        .from_table(Alias::new(dep.collection))
        .and_where(Expr::col(Alias::new(dep.column)).eq(id))
        .to_owned();
    let statement = db.get_database_backend().build(&statement);

    match run_tolerant(db, dep, statement).await? {
        Some(rows) => *report.removed.entry(dep.collection).or_default() += rows,
        None => report.skipped.push(dep.collection),
    }
    Ok(())
}

async fn detach_rows<C: ConnectionTrait>(
    db: &C,
    dep: Dependent,
    id: &str,
    report: &mut CascadeReport,
) -> Result<(), CascadeError> {
    let statement = Query::update()
        .table(Alias::new(dep.collection))
        .value(Alias::new(dep.column), Option::<String>::None)
        .and_where(Expr::col(Alias::new(dep.column)).eq(id))
        .to_owned();
    let statement = db.get_database_backend().build(&statement);

    match run_tolerant(db, dep, statement).await? {
        Some(rows) => *report.removed.entry(dep.collection).or_default() += rows,
        None => report.skipped.push(dep.collection),
    }
    Ok(())
}

/// Permanently removes an activity with everything hanging off it, then its
/// mirrored copies. Safe to repeat.
pub async fn hard_delete_activity<C: ConnectionTrait>(
    db: &C,
    files: &FileStorage,
    mirror: &Mirror,
    activity_id: &str,
) -> Result<CascadeReport, CascadeError> {
    let mut report = CascadeReport {
        id: activity_id.to_string(),
        ..Default::default()
    };

    for step in ACTIVITY_STEPS {
        match step {
            Step::Rows(dep) => delete_rows(db, dep, activity_id, &mut report).await?,
            Step::Files => {
                report.files_removed = files
                    .remove_activity(activity_id)
                    .await
                    .map_err(CascadeError::Files)?;
            }
        }
    }

    let deleted = activity::Entity::delete_by_id(activity_id.to_string())
        .exec(db)
        .await
        .map_err(|e| CascadeError::Root("activity", e))?;
    report.root_removed = deleted.rows_affected > 0;

    report.mirror = mirror.remove_activity(activity_id);

    info!(
        "Hard deleted activity {} (row removed: {}, dependents: {:?}, skipped: {:?}, mirror records: {})",
        activity_id,
        report.root_removed,
        report.removed,
        report.skipped,
        report.mirror.total()
    );
    Ok(report)
}

/// Permanently removes a member. Enrollments go, volunteer/task/user links
/// are cleared and the member is taken off session target lists.
pub async fn hard_delete_member<C: ConnectionTrait>(
    db: &C,
    mirror: &Mirror,
    member_id: &str,
) -> Result<CascadeReport, CascadeError> {
    let mut report = CascadeReport {
        id: member_id.to_string(),
        ..Default::default()
    };

    for dep in MEMBER_DELETES {
        delete_rows(db, dep, member_id, &mut report).await?;
    }
    for dep in MEMBER_DETACHES {
        detach_rows(db, dep, member_id, &mut report).await?;
    }

    let retargeted = untarget_sessions(db, member_id).await.map_err(|source| {
        CascadeError::Dependent {
            collection: "session",
            source,
        }
    })?;
    if retargeted > 0 {
        report.removed.insert("session", retargeted);
    }

    let deleted = member::Entity::delete_by_id(member_id.to_string())
        .exec(db)
        .await
        .map_err(|e| CascadeError::Root("member", e))?;
    report.root_removed = deleted.rows_affected > 0;

    report.mirror = mirror.remove_member(member_id);

    info!(
        "Hard deleted member {} (row removed: {}, dependents: {:?})",
        member_id, report.root_removed, report.removed
    );
    Ok(report)
}

/// Drops the member from every session target list. Sessions are few per
/// activity, so this filters in memory instead of relying on JSON operators
/// that differ per backend.
async fn untarget_sessions<C: ConnectionTrait>(db: &C, member_id: &str) -> Result<u64, DbErr> {
    let sessions = match session::Entity::find().all(db).await {
        Ok(sessions) => sessions,
        Err(e) if is_missing_relation(&e) => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut touched = 0;
    for model in sessions {
        let targets = model.targets();
        if !targets.iter().any(|t| t == member_id) {
            continue;
        }
        let remaining: Vec<String> = targets.into_iter().filter(|t| t != member_id).collect();
        session::Entity::update_many()
            .col_expr(
                session::Column::TargetMemberIds,
                Expr::value(serde_json::json!(remaining)),
            )
            .filter(session::Column::Id.eq(model.id.clone()))
            .exec(db)
            .await?;
        touched += 1;
    }

    debug!("Removed member {member_id} from {touched} session target lists");
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{enrollment, guest, guest_child, message, task, user, volunteer};
    use crate::mirror::{MirroredActivity, MirroredSession, PermissionEntry};
    use crate::storage::tests::temp_dir;
    use crate::testing::{self, at};
    use sea_orm::{DatabaseBackend, PaginatorTrait, Schema};

    async fn seed_activity_graph(db: &sea_orm::DatabaseConnection, activity_id: &str) {
        let member = testing::insert_member(db, "Kari", "Nordmann").await;
        testing::insert_enrollment(
            db,
            &member.id,
            activity_id,
            enrollment::EnrollmentRole::Participant,
        )
        .await;
        testing::insert_session(db, activity_id, &[member.id.as_str()]).await;
        testing::insert_message(db, activity_id, "Husk matpakke").await;
        let guest = testing::insert_guest(db, activity_id, "Ola").await;
        testing::insert_guest_child(db, &guest, "Lille Ola").await;
        testing::insert_volunteer(db, activity_id, Some(&member.id)).await;
        testing::insert_task(db, activity_id, Some(&member.id)).await;
    }

    #[tokio::test]
    async fn test_hard_delete_activity_removes_all_dependents() {
        let db = testing::memory_db().await;
        let storage = FileStorage::open(temp_dir("ansattportal-cascade")).await.unwrap();
        let mirror = Mirror::in_memory();

        let doomed = testing::insert_activity(&db, "Sommerleir").await;
        let kept = testing::insert_activity(&db, "Korps").await;
        seed_activity_graph(&db, &doomed.id).await;
        seed_activity_graph(&db, &kept.id).await;
        storage
            .save(&doomed.id, "plan.txt", "text/plain", b"plan", None)
            .await
            .unwrap();

        mirror.upsert_activities(vec![
            MirroredActivity::from(&doomed),
            MirroredActivity::from(&kept),
        ]);
        mirror.set_cover(&doomed.id, "cover.jpg");
        mirror.upsert_session(MirroredSession {
            id: "s-mirror".into(),
            activity_id: doomed.id.clone(),
            title: "Oppmøte".into(),
            starts_at: at(9),
            ends_at: at(10),
            location: None,
            target_member_ids: vec!["m1".into()],
        });
        mirror.upsert_permission(PermissionEntry {
            member_id: "m1".into(),
            activity_id: doomed.id.clone(),
            role: enrollment::EnrollmentRole::Leader,
        });

        let report = hard_delete_activity(&db, &storage, &mirror, &doomed.id)
            .await
            .unwrap();

        assert!(report.root_removed);
        assert!(report.skipped.is_empty());
        assert_eq!(report.files_removed, 1);
        for collection in [
            "enrollment",
            "session",
            "message",
            "guest_child",
            "guest",
            "volunteer",
            "task",
        ] {
            assert_eq!(report.removed.get(collection), Some(&1), "{collection}");
        }
        assert_eq!(report.mirror.activities, 1);
        assert_eq!(report.mirror.covers, 1);
        assert_eq!(report.mirror.sessions, 1);
        assert_eq!(report.mirror.calendar_entries, 1);
        assert_eq!(report.mirror.permissions, 1);

        assert!(activity::Entity::find_by_id(doomed.id.clone())
            .one(&db)
            .await
            .unwrap()
            .is_none());
        assert_eq!(enrollment::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(session::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(message::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(guest::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(guest_child::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(volunteer::Entity::find().count(&db).await.unwrap(), 1);
        assert_eq!(task::Entity::find().count(&db).await.unwrap(), 1);
        assert!(storage.list(&doomed.id).await.unwrap().is_empty());
        assert_eq!(mirror.activities(), vec![MirroredActivity::from(&kept)]);
    }

    #[tokio::test]
    async fn test_hard_delete_activity_twice_is_fine() {
        let db = testing::memory_db().await;
        let storage = FileStorage::open(temp_dir("ansattportal-cascade")).await.unwrap();
        let mirror = Mirror::in_memory();
        let activity = testing::insert_activity(&db, "Kurs").await;
        seed_activity_graph(&db, &activity.id).await;

        hard_delete_activity(&db, &storage, &mirror, &activity.id)
            .await
            .unwrap();
        let again = hard_delete_activity(&db, &storage, &mirror, &activity.id)
            .await
            .unwrap();

        assert!(!again.root_removed);
        assert!(again.removed.values().all(|rows| *rows == 0));
        assert_eq!(again.mirror.total(), 0);
    }

    #[tokio::test]
    async fn test_hard_delete_activity_with_non_uuid_id_runs_to_the_end() {
        let db = testing::memory_db().await;
        let storage = FileStorage::open(temp_dir("ansattportal-cascade")).await.unwrap();
        let mirror = Mirror::in_memory();

        let inserted = testing::insert_activity(&db, "Gammel import").await;
        activity::Entity::update_many()
            .col_expr(activity::Column::Id, Expr::value("legacy.42"))
            .filter(activity::Column::Id.eq(inserted.id))
            .exec(&db)
            .await
            .unwrap();
        let legacy = activity::Entity::find_by_id("legacy.42".to_string())
            .one(&db)
            .await
            .unwrap()
            .unwrap();
        seed_activity_graph(&db, &legacy.id).await;
        mirror.upsert_activities(vec![MirroredActivity::from(&legacy)]);

        let report = hard_delete_activity(&db, &storage, &mirror, "legacy.42")
            .await
            .unwrap();

        assert!(report.root_removed);
        assert_eq!(report.files_removed, 0);
        assert_eq!(report.removed.get("task"), Some(&1));
        assert!(activity::Entity::find_by_id("legacy.42".to_string())
            .one(&db)
            .await
            .unwrap()
            .is_none());
        assert_eq!(guest::Entity::find().count(&db).await.unwrap(), 0);
        assert!(mirror.activities().is_empty());
    }

    #[tokio::test]
    async fn test_hard_delete_activity_tolerates_missing_tables() {
        // Only the activity table is deployed.
        let db = testing::bare_memory_db().await;
        let backend = DatabaseBackend::Sqlite;
        let create = Schema::new(backend).create_table_from_entity(activity::Entity);
        db.execute(backend.build(&create)).await.unwrap();

        let activity = testing::insert_activity(&db, "Halvferdig").await;
        let storage = FileStorage::open(temp_dir("ansattportal-cascade")).await.unwrap();
        let mirror = Mirror::in_memory();

        let report = hard_delete_activity(&db, &storage, &mirror, &activity.id)
            .await
            .unwrap();

        assert!(report.root_removed);
        assert_eq!(
            report.skipped,
            vec!["enrollment", "session", "message", "guest_child", "guest", "volunteer", "task"]
        );
        assert!(report.removed.is_empty());
    }

    #[tokio::test]
    async fn test_missing_activity_table_is_a_hard_failure() {
        let db = testing::bare_memory_db().await;
        let storage = FileStorage::open(temp_dir("ansattportal-cascade")).await.unwrap();
        let mirror = Mirror::in_memory();

        let err = hard_delete_activity(&db, &storage, &mirror, "nope")
            .await
            .unwrap_err();
        assert!(matches!(err, CascadeError::Root("activity", _)));
    }

    #[tokio::test]
    async fn test_hard_delete_member_detaches_links() {
        let db = testing::memory_db().await;
        let mirror = Mirror::in_memory();
        let activity = testing::insert_activity(&db, "Speider").await;
        let member = testing::insert_member(&db, "Per", "Hansen").await;
        let other = testing::insert_member(&db, "Pål", "Hansen").await;
        testing::insert_enrollment(
            &db,
            &member.id,
            &activity.id,
            enrollment::EnrollmentRole::Leader,
        )
        .await;
        let volunteer = testing::insert_volunteer(&db, &activity.id, Some(&member.id)).await;
        let task = testing::insert_task(&db, &activity.id, Some(&member.id)).await;
        let session =
            testing::insert_session(&db, &activity.id, &[member.id.as_str(), other.id.as_str()])
                .await;
        let login = testing::insert_user(&db, "per@example.org", user::UserRole::Member, Some(&member.id)).await;
        mirror.upsert_session(MirroredSession::from(&session));

        let report = hard_delete_member(&db, &mirror, &member.id).await.unwrap();
        assert!(report.root_removed);
        assert_eq!(report.removed.get("enrollment"), Some(&1));
        assert_eq!(report.removed.get("session"), Some(&1));
        assert_eq!(report.mirror.calendar_entries, 1);

        let volunteer = volunteer::Entity::find_by_id(volunteer.id).one(&db).await.unwrap().unwrap();
        assert_eq!(volunteer.member_id, None);
        let task = task::Entity::find_by_id(task.id).one(&db).await.unwrap().unwrap();
        assert_eq!(task.assigned_member_id, None);
        let login = user::Entity::find_by_id(login.id).one(&db).await.unwrap().unwrap();
        assert_eq!(login.member_id, None);
        let session = session::Entity::find_by_id(session.id).one(&db).await.unwrap().unwrap();
        assert_eq!(session.targets(), vec![other.id.clone()]);
        assert_eq!(mirror.calendar_for_member(&other.id).len(), 1);
    }

    #[test]
    fn test_is_missing_relation() {
        assert!(is_missing_relation(&DbErr::Custom(
            "error returned from database: no such table: guest".into()
        )));
        assert!(is_missing_relation(&DbErr::Custom(
            "relation \"volunteer\" does not exist".into()
        )));
        assert!(!is_missing_relation(&DbErr::Custom(
            "database is locked".into()
        )));
    }
}
