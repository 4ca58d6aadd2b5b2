//! Set reconciliation
//!
//! Every group sync is the same routine: a desired set of device names from an
//! authoritative source, the actual set read from the group, a plain set
//! difference, then one add or remove per resolved directory object. A failing
//! name never stops the rest of the batch; a rejected token does.

pub mod computers;
pub mod maintenance;
pub mod providers;
pub mod rooms;
pub mod runner;

use crate::audit::{AuditLog, EventCode};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Membership side of the directory (Entra ID groups and devices)
#[async_trait]
pub trait Directory: Send + Sync {
    async fn lookup_group_id(&self, name: &str) -> Result<Option<String>>;

    /// Display names of the devices currently in the group
    async fn list_group_members(&self, group_id: &str) -> Result<Vec<String>>;

    /// Every directory object whose display name is `name`; duplicates included
    async fn resolve_device(&self, name: &str) -> Result<Vec<String>>;

    async fn add_member(&self, group_id: &str, member_id: &str) -> Result<Mutation>;

    async fn remove_member(&self, group_id: &str, member_id: &str) -> Result<Mutation>;
}

/// Outcome of an idempotent membership call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
    Applied,
    /// Already a member (add) or already absent (remove)
    AlreadyInState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Add,
    Remove,
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Operation::Add => write!(f, "add"),
            Operation::Remove => write!(f, "remove"),
        }
    }
}

/// Names to add and remove. Names are exact strings; no case folding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Diff {
    pub to_add: BTreeSet<String>,
    pub to_remove: BTreeSet<String>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }
}

pub fn diff(desired: &BTreeSet<String>, actual: &BTreeSet<String>) -> Diff {
    // First sync of an empty group: everything desired is an add.
    if actual.is_empty() {
        return Diff {
            to_add: desired.clone(),
            to_remove: BTreeSet::new(),
        };
    }

    Diff {
        to_add: desired.difference(actual).cloned().collect(),
        to_remove: actual.difference(desired).cloned().collect(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub name: String,
    pub id: String,
    pub op: Operation,
    pub outcome: Mutation,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub name: String,
    /// None when the name lookup itself failed
    pub id: Option<String>,
    pub op: Operation,
    pub error: String,
    pub transient: bool,
}

/// Everything one reconcile call did
#[derive(Debug, Clone, Default)]
pub struct ReconcileReport {
    pub applied: Vec<Applied>,
    pub failures: Vec<Failure>,
    /// Names that matched no directory object
    pub unresolved: Vec<String>,
}

impl ReconcileReport {
    pub fn count(&self, op: Operation, outcome: Mutation) -> usize {
        self.applied
            .iter()
            .filter(|a| a.op == op && a.outcome == outcome)
            .count()
    }

    pub fn added(&self) -> usize {
        self.count(Operation::Add, Mutation::Applied)
    }

    pub fn removed(&self) -> usize {
        self.count(Operation::Remove, Mutation::Applied)
    }

    /// Membership calls issued, successful or not
    pub fn attempts(&self) -> usize {
        self.applied.len() + self.failures.iter().filter(|f| f.id.is_some()).count()
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// The group being reconciled
#[derive(Debug, Clone)]
pub struct GroupRef<'a> {
    pub name: &'a str,
    pub id: &'a str,
}

/// Bring `group` from `actual` to `desired`.
///
/// A name resolving to several directory objects is applied to all of them.
/// Unresolved names are reported, not retried. Per-item errors land in the
/// report; a fatal error (rejected token, bad configuration) stops the batch
/// and is returned.
pub async fn reconcile(
    directory: &dyn Directory,
    group: &GroupRef<'_>,
    desired: &BTreeSet<String>,
    actual: &BTreeSet<String>,
    audit: &AuditLog,
) -> Result<ReconcileReport> {
    let plan = diff(desired, actual);
    let mut report = ReconcileReport::default();

    tracing::debug!(
        "{}: {} to add, {} to remove",
        group.name,
        plan.to_add.len(),
        plan.to_remove.len()
    );

    for name in &plan.to_add {
        apply(directory, group, name, Operation::Add, audit, &mut report).await?;
    }
    for name in &plan.to_remove {
        apply(directory, group, name, Operation::Remove, audit, &mut report).await?;
    }

    Ok(report)
}

async fn apply(
    directory: &dyn Directory,
    group: &GroupRef<'_>,
    name: &str,
    op: Operation,
    audit: &AuditLog,
    report: &mut ReconcileReport,
) -> Result<()> {
    let failed_code = match op {
        Operation::Add => EventCode::MemberAddFailed,
        Operation::Remove => EventCode::MemberRemoveFailed,
    };

    let ids = match directory.resolve_device(name).await {
        Ok(ids) => ids,
        Err(e) if e.is_fatal() => {
            audit.error(
                failed_code,
                format!("{}: aborting at '{}': {}", group.name, name, e),
            );
            return Err(e);
        }
        Err(e) => {
            audit.error(
                failed_code,
                format!("{}: could not look up '{}' to {}: {}", group.name, name, op, e),
            );
            report.failures.push(Failure {
                name: name.to_string(),
                id: None,
                op,
                transient: e.is_transient(),
                error: e.to_string(),
            });
            return Ok(());
        }
    };

    if ids.is_empty() {
        audit.warn(
            EventCode::DeviceUnresolved,
            format!("{}: '{}' matches no directory device", group.name, name),
        );
        report.unresolved.push(name.to_string());
        return Ok(());
    }

    if ids.len() > 1 {
        tracing::warn!(
            "{}: '{}' matches {} directory devices, applying {} to all",
            group.name,
            name,
            ids.len(),
            op
        );
    }

    for id in ids {
        let result = match op {
            Operation::Add => directory.add_member(group.id, &id).await,
            Operation::Remove => directory.remove_member(group.id, &id).await,
        };

        match result {
            Ok(outcome) => {
                let code = match op {
                    Operation::Add => EventCode::MemberAdded,
                    Operation::Remove => EventCode::MemberRemoved,
                };
                let verb = match (op, outcome) {
                    (Operation::Add, Mutation::Applied) => "added to",
                    (Operation::Add, Mutation::AlreadyInState) => "already in",
                    (Operation::Remove, Mutation::Applied) => "removed from",
                    (Operation::Remove, Mutation::AlreadyInState) => "already absent from",
                };
                audit.info(code, format!("{} ({}) {} {}", name, id, verb, group.name));
                report.applied.push(Applied {
                    name: name.to_string(),
                    id,
                    op,
                    outcome,
                });
            }
            Err(e) if e.is_fatal() => {
                audit.error(
                    failed_code,
                    format!("{}: aborting at {} ({}): {}", group.name, name, id, e),
                );
                return Err(e);
            }
            Err(e) => {
                audit.error(
                    failed_code,
                    format!("{}: failed to {} {} ({}): {}", group.name, op, name, id, e),
                );
                report.failures.push(Failure {
                    name: name.to_string(),
                    id: Some(id),
                    op,
                    transient: e.is_transient(),
                    error: e.to_string(),
                });
            }
        }
    }

    Ok(())
}

/// Outcome of a batch of independent device operations
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    /// (item, error)
    pub failures: Vec<(String, String)>,
    /// Items left for a later run
    pub deferred: Vec<String>,
    /// Items that would have been changed in a dry run
    pub planned: Vec<String>,
}

impl BatchReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{FakeDirectory, names};
    use super::*;

    const GROUP: GroupRef<'static> = GroupRef {
        name: "Lab-CHS-101",
        id: "g1",
    };

    #[test]
    fn test_diff_is_plain_set_difference() {
        let plan = diff(&names(&["D1", "D2", "D3"]), &names(&["D2", "D4"]));
        assert_eq!(plan.to_add, names(&["D1", "D3"]));
        assert_eq!(plan.to_remove, names(&["D4"]));
    }

    #[test]
    fn test_diff_empty_actual_adds_everything() {
        let plan = diff(&names(&["D1", "D2"]), &BTreeSet::new());
        assert_eq!(plan.to_add, names(&["D1", "D2"]));
        assert!(plan.to_remove.is_empty());
    }

    #[test]
    fn test_diff_equal_sets_is_empty() {
        assert!(diff(&names(&["D1"]), &names(&["D1"])).is_empty());
    }

    #[test]
    fn test_diff_is_case_sensitive() {
        let plan = diff(&names(&["chs-1"]), &names(&["CHS-1"]));
        assert_eq!(plan.to_add, names(&["chs-1"]));
        assert_eq!(plan.to_remove, names(&["CHS-1"]));
    }

    #[tokio::test]
    async fn test_first_sync_adds_every_desired_device() {
        let dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"]);

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1", "D2"]),
            &BTreeSet::new(),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(report.added(), 2);
        assert_eq!(report.removed(), 0);
        assert_eq!(dir.actual("g1"), names(&["D1", "D2"]));
    }

    #[tokio::test]
    async fn test_extra_member_is_removed() {
        let dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"])
            .with_members("g1", &["id-1", "id-2"]);

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1"]),
            &names(&["D1", "D2"]),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(report.added(), 0);
        assert_eq!(report.removed(), 1);
        assert_eq!(report.applied[0].name, "D2");
        assert_eq!(dir.call_count(), 1);
    }

    #[tokio::test]
    async fn test_second_run_is_a_no_op() {
        let dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"])
            .with_device("D3", &["id-3"])
            .with_members("g1", &["id-3"]);
        let desired = names(&["D1", "D2"]);

        let audit = AuditLog::disabled();
        let first = reconcile(&dir, &GROUP, &desired, &dir.actual("g1"), &audit)
            .await
            .unwrap();
        assert_eq!(first.attempts(), 3);

        let calls_after_first = dir.call_count();
        let second = reconcile(&dir, &GROUP, &desired, &dir.actual("g1"), &audit)
            .await
            .unwrap();

        assert_eq!(second.attempts(), 0);
        assert_eq!(dir.call_count(), calls_after_first);
    }

    #[tokio::test]
    async fn test_duplicate_names_fan_out_to_every_match() {
        let dir = FakeDirectory::default().with_device("D1", &["id-a", "id-b", "id-c"]);

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1"]),
            &BTreeSet::new(),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(report.attempts(), 3);
        assert_eq!(dir.call_count(), 3);
    }

    #[tokio::test]
    async fn test_unresolved_names_are_reported_not_applied() {
        let dir = FakeDirectory::default().with_device("D1", &["id-1"]);

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1", "GHOST"]),
            &BTreeSet::new(),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(report.unresolved, vec!["GHOST".to_string()]);
        assert_eq!(report.added(), 1);
        assert!(report.is_clean());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let mut dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"])
            .with_device("D3", &["id-3"]);
        dir.failing_ids.insert("id-1".into());
        dir.failing_lookups.insert("D2".into());

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1", "D2", "D3"]),
            &BTreeSet::new(),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert_eq!(report.added(), 1);
        assert_eq!(report.failures.len(), 2);
        assert!(!report.failures[0].transient);
        assert_eq!(report.failures[1].name, "D2");
        assert!(report.failures[1].transient);
        assert_eq!(report.failures[1].id, None);
        assert_eq!(dir.actual("g1"), names(&["D3"]));
    }

    #[tokio::test]
    async fn test_already_member_is_not_a_failure() {
        // The group listing is stale: D1 is already a member.
        let dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D9", &["id-9"])
            .with_members("g1", &["id-1", "id-9"]);

        let report = reconcile(
            &dir,
            &GROUP,
            &names(&["D1"]),
            &names(&["D9"]),
            &AuditLog::disabled(),
        )
        .await
        .unwrap();

        assert!(report.is_clean());
        assert_eq!(report.count(Operation::Add, Mutation::AlreadyInState), 1);
        assert_eq!(report.removed(), 1);
    }

    #[tokio::test]
    async fn test_rejected_token_stops_the_batch() {
        let mut dir = FakeDirectory::default()
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"])
            .with_device("D3", &["id-3"]);
        dir.token_rejected = true;

        let err = reconcile(
            &dir,
            &GROUP,
            &names(&["D1", "D2", "D3"]),
            &BTreeSet::new(),
            &AuditLog::disabled(),
        )
        .await
        .unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(dir.call_count(), 1);
    }
}
