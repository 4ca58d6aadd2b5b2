//! Runs sync targets one after another

use crate::audit::{AuditLog, EventCode, MissingLog};
use crate::error::Result;
use crate::reconcile::providers::DesiredSetProvider;
use crate::reconcile::{Diff, Directory, GroupRef, ReconcileReport, diff, reconcile};
use std::collections::BTreeSet;

/// What happened to one target
#[derive(Debug)]
pub enum TargetOutcome {
    Reconciled(ReconcileReport),
    /// Dry run: the changes that would have been made
    Planned(Diff),
    /// Group or source data missing; nothing was changed
    Skipped(String),
}

#[derive(Debug)]
pub struct TargetResult {
    pub group: String,
    pub description: String,
    pub outcome: TargetOutcome,
}

impl TargetResult {
    pub fn failures(&self) -> usize {
        match &self.outcome {
            TargetOutcome::Reconciled(report) => report.failures.len(),
            _ => 0,
        }
    }
}

pub struct SyncRunner<'a> {
    pub directory: &'a dyn Directory,
    pub audit: &'a AuditLog,
    pub missing: Option<&'a MissingLog>,
    pub dry_run: bool,
}

impl SyncRunner<'_> {
    /// Reconcile one target.
    ///
    /// Missing groups and recoverable source errors skip the target. Errors
    /// that would fail every other target too (authentication, configuration)
    /// are returned, including one raised part way through the membership
    /// changes.
    pub async fn sync_target(&self, source: &dyn DesiredSetProvider) -> Result<TargetResult> {
        let group_name = source.group();
        let description = source.describe();
        let result = |outcome| TargetResult {
            group: group_name.to_string(),
            description: description.clone(),
            outcome,
        };

        let group_id = match self.directory.lookup_group_id(group_name).await {
            Ok(Some(id)) => id,
            Ok(None) => {
                let reason = format!("group '{}' not found", group_name);
                self.audit.warn(EventCode::TargetSkipped, format!("{}: {}", description, reason));
                return Ok(result(TargetOutcome::Skipped(reason)));
            }
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.skip(&description, e.to_string(), result)),
        };

        let desired = match source.desired().await {
            Ok(desired) => desired,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.skip(&description, e.to_string(), result)),
        };

        let actual: BTreeSet<String> = match self.directory.list_group_members(&group_id).await {
            Ok(members) => members.into_iter().collect(),
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => return Ok(self.skip(&description, e.to_string(), result)),
        };

        tracing::info!(
            "{} -> {}: {} desired, {} current",
            description,
            group_name,
            desired.len(),
            actual.len()
        );

        if self.dry_run {
            return Ok(result(TargetOutcome::Planned(diff(&desired, &actual))));
        }

        let group = GroupRef {
            name: group_name,
            id: &group_id,
        };
        let report = reconcile(self.directory, &group, &desired, &actual, self.audit).await?;

        if let Some(missing) = self.missing {
            if let Err(e) = missing.append(group_name, &report.unresolved) {
                tracing::error!(
                    "Failed to write missing-devices log {}: {}",
                    missing.path().display(),
                    e
                );
            }
        }

        Ok(result(TargetOutcome::Reconciled(report)))
    }

    fn skip(
        &self,
        description: &str,
        reason: String,
        result: impl FnOnce(TargetOutcome) -> TargetResult,
    ) -> TargetResult {
        self.audit.warn(
            EventCode::TargetSkipped,
            format!("{}: skipped, {}", description, reason),
        );
        result(TargetOutcome::Skipped(reason))
    }

    /// Every target in order; stops only on a fatal error
    pub async fn sync_all(
        &self,
        sources: &[Box<dyn DesiredSetProvider + '_>],
    ) -> Result<Vec<TargetResult>> {
        let mode = if self.dry_run { " (dry run)" } else { "" };
        self.audit.info(
            EventCode::RunStarted,
            format!("Sync of {} target(s) started{}", sources.len(), mode),
        );

        let mut results = Vec::with_capacity(sources.len());
        for source in sources {
            results.push(self.sync_target(source.as_ref()).await?);
        }

        let failures: usize = results.iter().map(TargetResult::failures).sum();
        let skipped = results
            .iter()
            .filter(|r| matches!(r.outcome, TargetOutcome::Skipped(_)))
            .count();
        self.audit.info(
            EventCode::RunFinished,
            format!(
                "Sync finished: {} target(s), {} skipped, {} failure(s)",
                results.len(),
                skipped,
                failures
            ),
        );

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EduSyncError;
    use crate::reconcile::testing::{FakeDirectory, names};
    use async_trait::async_trait;

    struct FixedSource {
        group: String,
        desired: std::result::Result<BTreeSet<String>, fn() -> EduSyncError>,
    }

    impl FixedSource {
        fn ok(group: &str, items: &[&str]) -> Self {
            Self {
                group: group.into(),
                desired: Ok(names(items)),
            }
        }

        fn failing(group: &str, err: fn() -> EduSyncError) -> Self {
            Self {
                group: group.into(),
                desired: Err(err),
            }
        }
    }

    #[async_trait]
    impl DesiredSetProvider for FixedSource {
        fn group(&self) -> &str {
            &self.group
        }

        fn describe(&self) -> String {
            format!("fixed {}", self.group)
        }

        async fn desired(&self) -> Result<BTreeSet<String>> {
            match &self.desired {
                Ok(set) => Ok(set.clone()),
                Err(make) => Err(make()),
            }
        }
    }

    fn directory() -> FakeDirectory {
        FakeDirectory::default()
            .with_group("Lab-A", "g-a")
            .with_group("Lab-B", "g-b")
            .with_device("D1", &["id-1"])
            .with_device("D2", &["id-2"])
            .with_members("g-a", &["id-2"])
    }

    #[tokio::test]
    async fn test_sync_target_reconciles_and_logs_missing_names() {
        let dir = directory();
        let tmp = tempfile::tempdir().unwrap();
        let missing = MissingLog::new(tmp.path().join("missing.log"));
        let runner = SyncRunner {
            directory: &dir,
            audit: &AuditLog::disabled(),
            missing: Some(&missing),
            dry_run: false,
        };

        let result = runner
            .sync_target(&FixedSource::ok("Lab-A", &["D1", "GHOST"]))
            .await
            .unwrap();

        let TargetOutcome::Reconciled(report) = result.outcome else {
            panic!("expected a reconcile");
        };
        assert_eq!(report.added(), 1);
        assert_eq!(report.removed(), 1);
        assert_eq!(dir.actual("g-a"), names(&["D1"]));

        let logged = std::fs::read_to_string(missing.path()).unwrap();
        assert!(logged.contains("Lab-A\tGHOST"));
    }

    #[tokio::test]
    async fn test_dry_run_only_plans() {
        let dir = directory();
        let runner = SyncRunner {
            directory: &dir,
            audit: &AuditLog::disabled(),
            missing: None,
            dry_run: true,
        };

        let result = runner
            .sync_target(&FixedSource::ok("Lab-A", &["D1"]))
            .await
            .unwrap();

        let TargetOutcome::Planned(plan) = result.outcome else {
            panic!("expected a plan");
        };
        assert_eq!(plan.to_add, names(&["D1"]));
        assert_eq!(plan.to_remove, names(&["D2"]));
        assert_eq!(dir.call_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_group_and_not_found_source_skip_the_target() {
        let dir = directory();
        let runner = SyncRunner {
            directory: &dir,
            audit: &AuditLog::disabled(),
            missing: None,
            dry_run: false,
        };
        let sources: Vec<Box<dyn DesiredSetProvider>> = vec![
            Box::new(FixedSource::ok("No-Such-Group", &["D1"])),
            Box::new(FixedSource::failing("Lab-B", || {
                EduSyncError::not_found("Room", "CHS 999")
            })),
            Box::new(FixedSource::ok("Lab-A", &["D1", "D2"])),
        ];

        let results = runner.sync_all(&sources).await.unwrap();

        assert_eq!(results.len(), 3);
        assert!(matches!(results[0].outcome, TargetOutcome::Skipped(_)));
        assert!(matches!(results[1].outcome, TargetOutcome::Skipped(_)));
        assert!(matches!(results[2].outcome, TargetOutcome::Reconciled(_)));
        assert_eq!(dir.actual("g-a"), names(&["D1", "D2"]));
    }

    #[tokio::test]
    async fn test_fatal_source_error_aborts_the_run() {
        let dir = directory();
        let runner = SyncRunner {
            directory: &dir,
            audit: &AuditLog::disabled(),
            missing: None,
            dry_run: false,
        };
        let sources: Vec<Box<dyn DesiredSetProvider>> = vec![
            Box::new(FixedSource::failing("Lab-B", || {
                EduSyncError::AuthError("token rejected".into())
            })),
            Box::new(FixedSource::ok("Lab-A", &["D1"])),
        ];

        let err = runner.sync_all(&sources).await.unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(dir.call_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_token_mid_run_stops_every_later_target() {
        let mut dir = directory().with_device("D3", &["id-3"]);
        dir.token_rejected = true;
        let runner = SyncRunner {
            directory: &dir,
            audit: &AuditLog::disabled(),
            missing: None,
            dry_run: false,
        };
        let sources: Vec<Box<dyn DesiredSetProvider>> = vec![
            Box::new(FixedSource::ok("Lab-B", &["D1", "D2", "D3"])),
            Box::new(FixedSource::ok("Lab-A", &["D1", "D3"])),
        ];

        let err = runner.sync_all(&sources).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(dir.call_count(), 1);
        assert_eq!(dir.actual("g-a"), names(&["D2"]));
    }
}
