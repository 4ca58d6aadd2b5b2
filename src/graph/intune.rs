//! Intune Graph API operations
//!
//! Managed devices, Windows Autopilot identities and app assignments.

use crate::error::Result;
use crate::graph::GraphClient;
use crate::reconcile::maintenance::DeviceManagement;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

const MANAGED_DEVICE_FIELDS: &str = "id,deviceName,serialNumber,lastSyncDateTime,operatingSystem,\
    osVersion,userPrincipalName,userId,deviceRegistrationState,autopilotEnrolled,azureADDeviceId";

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ManagedDevice {
    pub id: String,
    #[serde(default)]
    pub device_name: Option<String>,
    #[serde(default)]
    pub serial_number: Option<String>,
    #[serde(default)]
    pub last_sync_date_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub os_version: Option<String>,
    #[serde(default)]
    pub user_principal_name: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub device_registration_state: Option<String>,
    #[serde(default)]
    pub autopilot_enrolled: Option<bool>,
    #[serde(default, rename = "azureADDeviceId")]
    pub azure_ad_device_id: Option<String>,
}

impl ManagedDevice {
    pub fn is_windows(&self) -> bool {
        self.operating_system
            .as_deref()
            .is_some_and(|os| os.eq_ignore_ascii_case("windows"))
    }

    pub fn has_primary_user(&self) -> bool {
        self.user_id.as_deref().is_some_and(|u| !u.is_empty())
            || self
                .user_principal_name
                .as_deref()
                .is_some_and(|u| !u.is_empty())
    }

    /// Serial number, ignoring the blanks Intune reports for some virtual machines
    pub fn serial(&self) -> Option<&str> {
        self.serial_number
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty() && *s != "0")
    }

    pub fn name(&self) -> &str {
        self.device_name.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct AutopilotDevice {
    pub id: String,
    #[serde(default)]
    pub serial_number: String,
    #[serde(default)]
    pub group_tag: Option<String>,
    #[serde(default)]
    pub enrollment_state: Option<String>,
    #[serde(default)]
    pub managed_device_id: Option<String>,
}

#[async_trait]
impl DeviceManagement for GraphClient {
    async fn list_managed_devices(&self) -> Result<Vec<ManagedDevice>> {
        // autopilotEnrolled is only exposed on beta
        self.get_all_pages_beta(&format!(
            "deviceManagement/managedDevices?$select={}",
            MANAGED_DEVICE_FIELDS
        ))
        .await
    }

    async fn delete_managed_device(&self, id: &str) -> Result<()> {
        self.delete(&format!("deviceManagement/managedDevices/{}", id))
            .await
    }

    async fn remove_primary_user(&self, id: &str) -> Result<()> {
        self.delete_beta(&format!("deviceManagement/managedDevices('{}')/users/$ref", id))
            .await
    }

    async fn list_autopilot_devices(&self) -> Result<Vec<AutopilotDevice>> {
        self.get_all_pages("deviceManagement/windowsAutopilotDeviceIdentities")
            .await
    }

    async fn delete_autopilot_device(&self, id: &str) -> Result<()> {
        self.delete(&format!(
            "deviceManagement/windowsAutopilotDeviceIdentities/{}",
            id
        ))
        .await
    }
}

/// One app assignment targeting a given group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupAppAssignment {
    pub app_id: String,
    pub app_name: String,
    pub app_type: String,
    pub intent: String,
    pub excluded: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MobileApp {
    id: String,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default, rename = "@odata.type")]
    odata_type: Option<String>,
    #[serde(default)]
    assignments: Vec<MobileAppAssignment>,
}

#[derive(Debug, Deserialize)]
struct MobileAppAssignment {
    #[serde(default)]
    intent: Option<String>,
    target: AssignmentTarget,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AssignmentTarget {
    #[serde(rename = "@odata.type")]
    odata_type: String,
    #[serde(default)]
    group_id: Option<String>,
}

/// Every app with an include or exclude assignment on `group_id`
pub async fn list_app_assignments_for_group(
    client: &GraphClient,
    group_id: &str,
) -> Result<Vec<GroupAppAssignment>> {
    let apps: Vec<MobileApp> = client
        .get_all_pages_beta("deviceAppManagement/mobileApps?$expand=assignments")
        .await?;

    Ok(assignments_for_group(apps, group_id))
}

fn assignments_for_group(apps: Vec<MobileApp>, group_id: &str) -> Vec<GroupAppAssignment> {
    let mut found = Vec::new();

    for app in apps {
        for assignment in &app.assignments {
            if assignment.target.group_id.as_deref() != Some(group_id) {
                continue;
            }

            found.push(GroupAppAssignment {
                app_id: app.id.clone(),
                app_name: app.display_name.clone().unwrap_or_else(|| app.id.clone()),
                app_type: app
                    .odata_type
                    .as_deref()
                    .unwrap_or("unknown")
                    .trim_start_matches("#microsoft.graph.")
                    .to_string(),
                intent: assignment
                    .intent
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string()),
                excluded: assignment.target.odata_type
                    == "#microsoft.graph.exclusionGroupAssignmentTarget",
            });
        }
    }

    found.sort_by(|a, b| a.app_name.to_lowercase().cmp(&b.app_name.to_lowercase()));
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_managed_device_parses_graph_payload() {
        let device: ManagedDevice = serde_json::from_value(serde_json::json!({
            "id": "md-1",
            "deviceName": "CHS-10234",
            "serialNumber": "5CG1234",
            "lastSyncDateTime": "2024-09-01T12:30:00Z",
            "operatingSystem": "Windows",
            "osVersion": "10.0.22631.4037",
            "userPrincipalName": "student@district.org",
            "deviceRegistrationState": "registered",
            "autopilotEnrolled": true,
            "azureADDeviceId": "aad-1"
        }))
        .unwrap();

        assert!(device.is_windows());
        assert!(device.has_primary_user());
        assert_eq!(device.serial(), Some("5CG1234"));
        assert_eq!(device.azure_ad_device_id.as_deref(), Some("aad-1"));
        assert!(device.last_sync_date_time.is_some());
    }

    #[test]
    fn test_blank_serials_are_ignored() {
        let device = ManagedDevice {
            id: "x".into(),
            serial_number: Some("  ".into()),
            ..Default::default()
        };
        assert_eq!(device.serial(), None);
        assert_eq!(device.name(), "x");
    }

    #[test]
    fn test_assignments_for_group_filters_and_sorts() {
        let apps: Vec<MobileApp> = serde_json::from_value(serde_json::json!([
            {
                "id": "app-2",
                "displayName": "Zoom",
                "@odata.type": "#microsoft.graph.win32LobApp",
                "assignments": [
                    {"intent": "required", "target": {"@odata.type": "#microsoft.graph.groupAssignmentTarget", "groupId": "g1"}}
                ]
            },
            {
                "id": "app-1",
                "displayName": "Adobe Acrobat Reader",
                "@odata.type": "#microsoft.graph.win32LobApp",
                "assignments": [
                    {"intent": "available", "target": {"@odata.type": "#microsoft.graph.exclusionGroupAssignmentTarget", "groupId": "g1"}},
                    {"intent": "required", "target": {"@odata.type": "#microsoft.graph.groupAssignmentTarget", "groupId": "g2"}}
                ]
            },
            {
                "id": "app-3",
                "displayName": "Calculator",
                "assignments": [
                    {"intent": "required", "target": {"@odata.type": "#microsoft.graph.allDevicesAssignmentTarget"}}
                ]
            }
        ]))
        .unwrap();

        let found = assignments_for_group(apps, "g1");
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].app_name, "Adobe Acrobat Reader");
        assert!(found[0].excluded);
        assert_eq!(found[1].app_type, "win32LobApp");
        assert_eq!(found[1].intent, "required");
        assert!(!found[1].excluded);
    }
}
