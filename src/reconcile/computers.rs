//! Stale and misnamed Active Directory computer objects
//!
//! Computers whose names do not follow the naming convention are matched to
//! their Intune record by name. Without one they are deleted once past the
//! grace period; with one, the helpdesk asset tag for the serial is the
//! authoritative name and the machine is renamed when it is reachable.

use crate::ad::{Computer, ComputerDirectory, HostProbe};
use crate::audit::{AuditLog, EventCode};
use crate::config::ComputersConfig;
use crate::error::Result;
use crate::graph::intune::ManagedDevice;
use crate::helpdesk::Inventory;
use crate::reconcile::BatchReport;
use crate::reconcile::maintenance::DeviceManagement;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use std::collections::{BTreeMap, HashMap, HashSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComputerAction<'c> {
    /// No managed device and older than the grace period
    DeleteStale(&'c Computer),
    /// No managed device yet, but too new to judge
    WithinGrace(&'c Computer),
    /// A newer record for a serial that already has one
    DeleteDuplicate {
        computer: &'c Computer,
        kept: &'c Computer,
        serial: String,
    },
    /// Compare the name against the asset tag of `serial`
    VerifyName { computer: &'c Computer, serial: String },
}

/// Work out what to do with each directory computer.
///
/// Duplicates keep the OLDEST record, which is the reverse of the managed
/// device clean-up (newest wins). Both behaviours are kept as found until the
/// owners settle which one is right.
pub fn plan_computer_actions<'c>(
    computers: &'c [Computer],
    managed: &[ManagedDevice],
    name_pattern: &Regex,
    grace_days: i64,
    now: DateTime<Utc>,
) -> Vec<ComputerAction<'c>> {
    let mut serial_by_name: HashMap<String, &str> = HashMap::new();
    for device in managed {
        if let (Some(name), Some(serial)) = (device.device_name.as_deref(), device.serial()) {
            serial_by_name.entry(name.to_lowercase()).or_insert(serial);
        }
    }

    let serial_of = |c: &Computer| serial_by_name.get(&c.name.to_lowercase()).copied();

    let mut by_serial: BTreeMap<&str, Vec<&Computer>> = BTreeMap::new();
    for computer in computers {
        if let Some(serial) = serial_of(computer) {
            by_serial.entry(serial).or_default().push(computer);
        }
    }

    let mut actions = Vec::new();
    let mut duplicates: HashSet<&str> = HashSet::new();

    for (serial, records) in &by_serial {
        if records.len() < 2 {
            continue;
        }
        let Some(oldest) = records.iter().copied().min_by_key(|c| c.when_created) else {
            continue;
        };
        for computer in records.iter().copied() {
            if !std::ptr::eq(computer, oldest) {
                duplicates.insert(computer.distinguished_name.as_str());
                actions.push(ComputerAction::DeleteDuplicate {
                    computer,
                    kept: oldest,
                    serial: serial.to_string(),
                });
            }
        }
    }

    let grace = Duration::days(grace_days);
    for computer in computers {
        if name_pattern.is_match(&computer.name)
            || duplicates.contains(computer.distinguished_name.as_str())
        {
            continue;
        }

        match serial_of(computer) {
            Some(serial) => actions.push(ComputerAction::VerifyName {
                computer,
                serial: serial.to_string(),
            }),
            None if now - computer.when_created > grace => {
                actions.push(ComputerAction::DeleteStale(computer))
            }
            None => actions.push(ComputerAction::WithinGrace(computer)),
        }
    }

    actions
}

/// Applies planned actions against AD, one computer at a time
pub struct ComputerReconciler<'a> {
    pub directory: &'a dyn ComputerDirectory,
    pub inventory: &'a dyn Inventory,
    pub probe: &'a dyn HostProbe,
    pub audit: &'a AuditLog,
    pub dry_run: bool,
}

impl ComputerReconciler<'_> {
    pub async fn apply(&self, actions: &[ComputerAction<'_>]) -> BatchReport {
        let mut report = BatchReport::default();

        for action in actions {
            match action {
                ComputerAction::WithinGrace(computer) => {
                    tracing::debug!(
                        "{} has no managed device but was created {}; leaving it",
                        computer.name,
                        computer.when_created
                    );
                }
                ComputerAction::DeleteStale(computer) => {
                    self.delete(computer, "stale", &mut report).await;
                }
                ComputerAction::DeleteDuplicate {
                    computer,
                    kept,
                    serial,
                } => {
                    tracing::info!(
                        "{} duplicates serial {} of {}",
                        computer.name,
                        serial,
                        kept.name
                    );
                    self.delete(computer, "duplicate", &mut report).await;
                }
                ComputerAction::VerifyName { computer, serial } => {
                    self.verify_name(computer, serial, &mut report).await;
                }
            }
        }

        report
    }

    async fn delete(&self, computer: &Computer, reason: &str, report: &mut BatchReport) {
        let label = format!("{} ({})", computer.name, reason);

        if self.dry_run {
            report.planned.push(format!("delete {}", label));
            return;
        }

        match self.directory.delete_computer(computer).await {
            Ok(()) => {
                self.audit.info(
                    EventCode::ComputerDeleted,
                    format!("Deleted {} computer object {}", reason, computer.distinguished_name),
                );
                report.succeeded.push(label);
            }
            Err(e) => {
                self.audit.error(
                    EventCode::ComputerFailed,
                    format!("Failed to delete {}: {}", computer.distinguished_name, e),
                );
                report.failures.push((label, e.to_string()));
            }
        }
    }

    async fn verify_name(&self, computer: &Computer, serial: &str, report: &mut BatchReport) {
        let asset = match self.inventory.get_device(serial).await {
            Ok(asset) => asset,
            Err(e) => {
                self.audit.error(
                    EventCode::ComputerFailed,
                    format!("Helpdesk lookup of {} for {} failed: {}", serial, computer.name, e),
                );
                report.failures.push((computer.name.clone(), e.to_string()));
                return;
            }
        };

        let Some(tag) = asset
            .and_then(|a| a.asset_tag)
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
        else {
            self.audit.warn(
                EventCode::DeviceUnresolved,
                format!("No helpdesk asset tag for serial {} ({})", serial, computer.name),
            );
            return;
        };

        if tag.eq_ignore_ascii_case(&computer.name) {
            return;
        }

        let label = format!("{} -> {}", computer.name, tag);
        if self.dry_run {
            report.planned.push(format!("rename {}", label));
            return;
        }

        if !self.probe.is_reachable(computer.host()).await {
            self.audit.info(
                EventCode::ComputerDeferred,
                format!("{} is offline; rename to {} deferred", computer.name, tag),
            );
            report.deferred.push(label);
            return;
        }

        match self.directory.rename_computer(computer, &tag).await {
            Ok(()) => {
                self.audit
                    .info(EventCode::ComputerRenamed, format!("Renamed {}", label));
                report.succeeded.push(label);
            }
            Err(e) => {
                self.audit.error(
                    EventCode::ComputerFailed,
                    format!("Failed to rename {}: {}", label, e),
                );
                report.failures.push((label, e.to_string()));
            }
        }
    }
}

/// List, plan and apply in one go
pub async fn reconcile_computers(
    directory: &dyn ComputerDirectory,
    devices: &dyn DeviceManagement,
    inventory: &dyn Inventory,
    probe: &dyn HostProbe,
    settings: &ComputersConfig,
    audit: &AuditLog,
    dry_run: bool,
) -> Result<BatchReport> {
    let pattern = Regex::new(&settings.name_pattern)?;
    let computers = directory.list_computers().await?;
    let managed = devices.list_managed_devices().await?;

    let actions = plan_computer_actions(
        &computers,
        &managed,
        &pattern,
        settings.stale_grace_days,
        Utc::now(),
    );
    tracing::info!(
        "{} computer object(s), {} action(s) planned",
        computers.len(),
        actions.len()
    );

    let reconciler = ComputerReconciler {
        directory,
        inventory,
        probe,
        audit,
        dry_run,
    };
    Ok(reconciler.apply(&actions).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EduSyncError;
    use crate::helpdesk::Asset;
    use crate::reconcile::testing::{FakeDevices, FakeInventory};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeAd {
        computers: Vec<Computer>,
        failing: HashSet<String>,
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ComputerDirectory for FakeAd {
        async fn list_computers(&self) -> Result<Vec<Computer>> {
            Ok(self.computers.clone())
        }

        async fn delete_computer(&self, computer: &Computer) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("delete:{}", computer.name));
            if self.failing.contains(&computer.name) {
                return Err(EduSyncError::DirectoryError("access denied".into()));
            }
            Ok(())
        }

        async fn rename_computer(&self, computer: &Computer, new_name: &str) -> Result<()> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("rename:{}:{}", computer.name, new_name));
            Ok(())
        }
    }

    struct FixedProbe(bool);

    #[async_trait]
    impl HostProbe for FixedProbe {
        async fn is_reachable(&self, _host: &str) -> bool {
            self.0
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 9, 10, 12, 0, 0).unwrap()
    }

    fn computer(name: &str, hours_old: i64) -> Computer {
        Computer {
            name: name.into(),
            distinguished_name: format!("CN={},OU=Labs,DC=district,DC=org", name),
            dns_host_name: None,
            when_created: now() - Duration::hours(hours_old),
        }
    }

    fn managed(name: &str, serial: &str) -> ManagedDevice {
        ManagedDevice {
            id: format!("md-{}", name),
            device_name: Some(name.into()),
            serial_number: Some(serial.into()),
            ..Default::default()
        }
    }

    fn pattern() -> Regex {
        Regex::new(r"^[A-Z]{2,4}-\d{4,6}$").unwrap()
    }

    #[test]
    fn test_plan_respects_naming_convention_and_grace() {
        let computers = vec![
            computer("CHS-10001", 500),
            computer("DESKTOP-OLD", 48),
            computer("DESKTOP-NEW", 2),
            computer("DESKTOP-ENR", 48),
        ];
        let managed = vec![managed("desktop-enr", "SN9")];

        let actions = plan_computer_actions(&computers, &managed, &pattern(), 1, now());

        assert_eq!(
            actions,
            vec![
                ComputerAction::DeleteStale(&computers[1]),
                ComputerAction::WithinGrace(&computers[2]),
                ComputerAction::VerifyName {
                    computer: &computers[3],
                    serial: "SN9".into()
                },
            ]
        );
    }

    #[test]
    fn test_duplicate_records_keep_the_oldest() {
        let computers = vec![
            computer("DESKTOP-A", 10),
            computer("CHS-20001", 300),
            computer("DESKTOP-B", 50),
        ];
        let managed = vec![
            managed("DESKTOP-A", "SN1"),
            managed("CHS-20001", "SN1"),
            managed("DESKTOP-B", "SN1"),
        ];

        let actions = plan_computer_actions(&computers, &managed, &pattern(), 1, now());

        let deleted: Vec<&str> = actions
            .iter()
            .filter_map(|a| match a {
                ComputerAction::DeleteDuplicate { computer, kept, .. } => {
                    assert_eq!(kept.name, "CHS-20001");
                    Some(computer.name.as_str())
                }
                _ => None,
            })
            .collect();
        assert_eq!(deleted, vec!["DESKTOP-A", "DESKTOP-B"]);
        assert_eq!(actions.len(), 2);
    }

    #[tokio::test]
    async fn test_rename_only_when_reachable() {
        let ad = FakeAd::default();
        let mut inventory = FakeInventory::default();
        inventory.assets = vec![Asset {
            asset_id: "a1".into(),
            asset_tag: Some("CHS-10234".into()),
            serial_number: Some("SN1".into()),
            ..Default::default()
        }];
        let target = computer("DESKTOP-7QX2", 72);
        let actions = vec![ComputerAction::VerifyName {
            computer: &target,
            serial: "SN1".into(),
        }];

        let offline = ComputerReconciler {
            directory: &ad,
            inventory: &inventory,
            probe: &FixedProbe(false),
            audit: &AuditLog::disabled(),
            dry_run: false,
        };
        let report = offline.apply(&actions).await;
        assert_eq!(report.deferred, vec!["DESKTOP-7QX2 -> CHS-10234"]);
        assert!(report.is_clean());
        assert!(ad.calls.lock().unwrap().is_empty());

        let online = ComputerReconciler {
            probe: &FixedProbe(true),
            ..offline
        };
        let report = online.apply(&actions).await;
        assert_eq!(report.succeeded.len(), 1);
        assert_eq!(
            ad.calls.lock().unwrap().clone(),
            vec!["rename:DESKTOP-7QX2:CHS-10234"]
        );
    }

    #[tokio::test]
    async fn test_matching_name_and_missing_tag_do_nothing() {
        let ad = FakeAd::default();
        let mut inventory = FakeInventory::default();
        inventory.assets = vec![Asset {
            asset_id: "a1".into(),
            asset_tag: Some("chs-10234".into()),
            serial_number: Some("SN1".into()),
            ..Default::default()
        }];
        let same = computer("CHS-10234", 72);
        let unknown = computer("DESKTOP-X", 72);
        let actions = vec![
            ComputerAction::VerifyName {
                computer: &same,
                serial: "SN1".into(),
            },
            ComputerAction::VerifyName {
                computer: &unknown,
                serial: "SN-UNKNOWN".into(),
            },
        ];

        let reconciler = ComputerReconciler {
            directory: &ad,
            inventory: &inventory,
            probe: &FixedProbe(true),
            audit: &AuditLog::disabled(),
            dry_run: false,
        };
        let report = reconciler.apply(&actions).await;

        assert!(report.succeeded.is_empty());
        assert!(report.is_clean());
        assert!(ad.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_computers_isolates_failures_and_honours_dry_run() {
        let mut ad = FakeAd::default();
        ad.computers = vec![computer("DESKTOP-1", 100), computer("DESKTOP-2", 100)];
        ad.failing.insert("DESKTOP-1".into());
        let devices = FakeDevices::default();
        let inventory = FakeInventory::default();
        let settings = ComputersConfig::default();

        let dry = reconcile_computers(
            &ad,
            &devices,
            &inventory,
            &FixedProbe(true),
            &settings,
            &AuditLog::disabled(),
            true,
        )
        .await
        .unwrap();
        assert_eq!(dry.planned.len(), 2);
        assert!(ad.calls.lock().unwrap().is_empty());

        let report = reconcile_computers(
            &ad,
            &devices,
            &inventory,
            &FixedProbe(true),
            &settings,
            &AuditLog::disabled(),
            false,
        )
        .await
        .unwrap();
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.succeeded, vec!["DESKTOP-2 (stale)"]);
        assert_eq!(
            ad.calls.lock().unwrap().clone(),
            vec!["delete:DESKTOP-1", "delete:DESKTOP-2"]
        );
    }
}
