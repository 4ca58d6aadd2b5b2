//! Device-level clean-up: primary users, duplicate Intune records, retired
//! Autopilot registrations. Each item is independent; failures are logged and
//! the batch carries on.

use crate::audit::{AuditLog, EventCode};
use crate::error::Result;
use crate::graph::intune::{AutopilotDevice, ManagedDevice};
use crate::helpdesk::Inventory;
use crate::reconcile::BatchReport;
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet};

/// Intune side of the directory
#[async_trait]
pub trait DeviceManagement: Send + Sync {
    async fn list_managed_devices(&self) -> Result<Vec<ManagedDevice>>;
    async fn delete_managed_device(&self, id: &str) -> Result<()>;
    async fn remove_primary_user(&self, id: &str) -> Result<()>;
    async fn list_autopilot_devices(&self) -> Result<Vec<AutopilotDevice>>;
    async fn delete_autopilot_device(&self, id: &str) -> Result<()>;
}

/// Registered Windows devices on `os_prefix` that still have a primary user
pub fn primary_user_candidates<'d>(
    devices: &'d [ManagedDevice],
    os_prefix: &str,
) -> Vec<&'d ManagedDevice> {
    devices
        .iter()
        .filter(|d| {
            d.device_registration_state
                .as_deref()
                .is_some_and(|s| s.eq_ignore_ascii_case("registered"))
        })
        .filter(|d| d.is_windows())
        .filter(|d| d.has_primary_user())
        .filter(|d| {
            d.os_version
                .as_deref()
                .is_some_and(|v| v.starts_with(os_prefix))
        })
        .collect()
}

pub async fn remove_primary_users(
    intune: &dyn DeviceManagement,
    os_prefix: &str,
    audit: &AuditLog,
    dry_run: bool,
) -> Result<BatchReport> {
    let devices = intune.list_managed_devices().await?;
    let candidates = primary_user_candidates(&devices, os_prefix);
    let mut report = BatchReport::default();

    tracing::info!(
        "{} of {} managed devices have a primary user to remove",
        candidates.len(),
        devices.len()
    );

    for device in candidates {
        let label = format!(
            "{} ({})",
            device.name(),
            device.user_principal_name.as_deref().unwrap_or("unknown user")
        );

        if dry_run {
            report.planned.push(label);
            continue;
        }

        match intune.remove_primary_user(&device.id).await {
            Ok(()) => {
                audit.info(
                    EventCode::PrimaryUserRemoved,
                    format!("Removed primary user from {}", label),
                );
                report.succeeded.push(label);
            }
            Err(e) => {
                audit.error(
                    EventCode::PrimaryUserRemoveFailed,
                    format!("Failed to remove primary user from {}: {}", label, e),
                );
                report.failures.push((label, e.to_string()));
            }
        }
    }

    Ok(report)
}

/// Managed devices to delete so that each serial keeps only its most recently
/// synced record. A missing sync time counts as oldest; on a tie the first
/// record in listing order is kept.
pub fn plan_duplicate_cleanup(devices: &[ManagedDevice]) -> Vec<&ManagedDevice> {
    let mut by_serial: BTreeMap<&str, Vec<&ManagedDevice>> = BTreeMap::new();
    for device in devices {
        if let Some(serial) = device.serial() {
            by_serial.entry(serial).or_default().push(device);
        }
    }

    let mut doomed = Vec::new();
    for group in by_serial.values().filter(|g| g.len() > 1) {
        let mut keep = 0;
        for (i, device) in group.iter().enumerate().skip(1) {
            if device.last_sync_date_time > group[keep].last_sync_date_time {
                keep = i;
            }
        }

        doomed.extend(
            group
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != keep)
                .map(|(_, d)| *d),
        );
    }

    doomed
}

pub async fn remove_duplicates(
    intune: &dyn DeviceManagement,
    audit: &AuditLog,
    dry_run: bool,
) -> Result<BatchReport> {
    let devices = intune.list_managed_devices().await?;
    let doomed = plan_duplicate_cleanup(&devices);
    let mut report = BatchReport::default();

    for device in doomed {
        let label = format!(
            "{} [{}] ({})",
            device.name(),
            device.serial().unwrap_or_default(),
            device.id
        );

        if dry_run {
            report.planned.push(label);
            continue;
        }

        match intune.delete_managed_device(&device.id).await {
            Ok(()) => {
                audit.info(
                    EventCode::DuplicateDeleted,
                    format!("Deleted stale duplicate managed device {}", label),
                );
                report.succeeded.push(label);
            }
            Err(e) => {
                audit.error(
                    EventCode::DuplicateDeleteFailed,
                    format!("Failed to delete duplicate managed device {}: {}", label, e),
                );
                report.failures.push((label, e.to_string()));
            }
        }
    }

    Ok(report)
}

fn normalize_serial(serial: &str) -> String {
    serial.trim().to_uppercase()
}

/// Autopilot registrations whose serial the helpdesk lists as retired
pub fn retired_registrations<'a>(
    autopilot: &'a [AutopilotDevice],
    retired_serials: &BTreeSet<String>,
) -> Vec<&'a AutopilotDevice> {
    let retired: BTreeSet<String> = retired_serials
        .iter()
        .map(|s| normalize_serial(s))
        .collect();

    autopilot
        .iter()
        .filter(|d| !d.serial_number.trim().is_empty())
        .filter(|d| retired.contains(&normalize_serial(&d.serial_number)))
        .collect()
}

pub async fn remove_retired(
    intune: &dyn DeviceManagement,
    inventory: &dyn Inventory,
    retired_statuses: &[String],
    audit: &AuditLog,
    dry_run: bool,
) -> Result<BatchReport> {
    let retired_assets = inventory
        .list_devices_by_status(retired_statuses, &[])
        .await?;
    let retired_serials: BTreeSet<String> = retired_assets
        .into_iter()
        .filter_map(|a| a.serial_number)
        .collect();

    let autopilot = intune.list_autopilot_devices().await?;
    let doomed = retired_registrations(&autopilot, &retired_serials);
    let mut report = BatchReport::default();

    for device in doomed {
        let label = device.serial_number.clone();

        if dry_run {
            report.planned.push(label);
            continue;
        }

        match intune.delete_autopilot_device(&device.id).await {
            Ok(()) => {
                audit.info(
                    EventCode::RetiredDeleted,
                    format!("Deleted Autopilot registration of retired device {}", label),
                );
                report.succeeded.push(label);
            }
            Err(e) => {
                audit.error(
                    EventCode::RetiredDeleteFailed,
                    format!("Failed to delete Autopilot registration {}: {}", label, e),
                );
                report.failures.push((label, e.to_string()));
            }
        }
    }

    Ok(report)
}
