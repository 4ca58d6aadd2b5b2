//! Desired-set providers, one per kind of sync target

use crate::config::{BuildingTarget, CompletedTarget, LabTarget, StatusTarget};
use crate::error::{EduSyncError, Result};
use crate::helpdesk::{Asset, Inventory};
use crate::reconcile::maintenance::DeviceManagement;
use crate::reconcile::rooms::{BuildingMap, resolve_room};
use async_trait::async_trait;
use std::collections::BTreeSet;

/// Computes the device names that should be in one group
#[async_trait]
pub trait DesiredSetProvider: Send + Sync {
    /// Display name of the target group
    fn group(&self) -> &str;

    /// Short description for logs
    fn describe(&self) -> String;

    async fn desired(&self) -> Result<BTreeSet<String>>;
}

fn asset_tags<'a>(assets: impl IntoIterator<Item = &'a Asset>) -> BTreeSet<String> {
    assets
        .into_iter()
        .filter_map(|a| a.asset_tag.as_deref())
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from)
        .collect()
}

/// Devices assigned to one lab room
pub struct LabRoomSource<'a> {
    pub target: &'a LabTarget,
    pub buildings: &'a BuildingMap,
    pub inventory: &'a dyn Inventory,
}

#[async_trait]
impl DesiredSetProvider for LabRoomSource<'_> {
    fn group(&self) -> &str {
        &self.target.group
    }

    fn describe(&self) -> String {
        format!("lab {} room {}", self.target.building, self.target.room)
    }

    async fn desired(&self) -> Result<BTreeSet<String>> {
        let rooms = self.inventory.list_rooms().await?;
        let room = resolve_room(
            &self.target.building,
            &self.target.room,
            &rooms,
            self.buildings,
        )
        .ok_or_else(|| {
            EduSyncError::not_found(
                "Room",
                format!("{} {}", self.target.building, self.target.room),
            )
        })?;

        let tags = self.inventory.list_devices_by_room(&room.room_id).await?;
        Ok(tags
            .into_iter()
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .collect())
    }
}

/// Every device of a building in the given statuses and types
pub struct BuildingCohortSource<'a> {
    pub target: &'a BuildingTarget,
    pub buildings: &'a BuildingMap,
    pub inventory: &'a dyn Inventory,
}

#[async_trait]
impl DesiredSetProvider for BuildingCohortSource<'_> {
    fn group(&self) -> &str {
        &self.target.group
    }

    fn describe(&self) -> String {
        format!("building {}", self.target.building)
    }

    async fn desired(&self) -> Result<BTreeSet<String>> {
        let name = self
            .buildings
            .resolve(&self.target.building)
            .ok_or_else(|| EduSyncError::not_found("Building code", &self.target.building))?;

        let known = self.inventory.list_buildings().await?;
        if !known.iter().any(|b| b.name == name) {
            return Err(EduSyncError::not_found("Building", name));
        }

        let assets = self
            .inventory
            .list_devices_by_status(&self.target.statuses, &self.target.types)
            .await?;

        Ok(asset_tags(
            assets.iter().filter(|a| a.building.as_deref() == Some(name)),
        ))
    }
}

/// Devices in a set of helpdesk statuses, e.g. unassigned stock
pub struct StatusSource<'a> {
    pub target: &'a StatusTarget,
    pub inventory: &'a dyn Inventory,
}

#[async_trait]
impl DesiredSetProvider for StatusSource<'_> {
    fn group(&self) -> &str {
        &self.target.group
    }

    fn describe(&self) -> String {
        format!("status {}", self.target.statuses.join("/"))
    }

    async fn desired(&self) -> Result<BTreeSet<String>> {
        let assets = self
            .inventory
            .list_devices_by_status(&self.target.statuses, &self.target.types)
            .await?;
        Ok(asset_tags(&assets))
    }
}

/// Windows devices that finished Autopilot enrollment
pub struct CompletedAutopilotSource<'a> {
    pub target: &'a CompletedTarget,
    pub devices: &'a dyn DeviceManagement,
}

#[async_trait]
impl DesiredSetProvider for CompletedAutopilotSource<'_> {
    fn group(&self) -> &str {
        &self.target.group
    }

    fn describe(&self) -> String {
        "completed Autopilot devices".to_string()
    }

    async fn desired(&self) -> Result<BTreeSet<String>> {
        let managed = self.devices.list_managed_devices().await?;
        Ok(managed
            .iter()
            .filter(|d| d.is_windows() && d.autopilot_enrolled == Some(true))
            .filter_map(|d| d.device_name.clone())
            .collect())
    }
}
