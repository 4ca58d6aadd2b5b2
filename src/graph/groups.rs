//! Entra ID group membership over Microsoft Graph
//!
//! Implements the reconciler's [`Directory`] contract: group lookup by display
//! name, device-member listing, device lookup by display name, and `$ref`
//! membership changes that tolerate "already a member" / "not a member".

use crate::error::{EduSyncError, Result, is_already_member_error};
use crate::graph::{GraphClient, odata_literal};
use crate::reconcile::{Directory, Mutation};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

/// A group or device as returned with `$select=id,displayName`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryObject {
    pub id: String,
    #[serde(default)]
    pub display_name: Option<String>,
}

#[async_trait]
impl Directory for GraphClient {
    async fn lookup_group_id(&self, name: &str) -> Result<Option<String>> {
        let groups: Vec<DirectoryObject> = self
            .get_all_pages(&format!(
                "groups?$filter=displayName eq '{}'&$select=id,displayName",
                odata_literal(name)
            ))
            .await?;

        if groups.len() > 1 {
            tracing::warn!(
                "{} groups are named '{}', using {}",
                groups.len(),
                name,
                groups[0].id
            );
        }

        Ok(groups.into_iter().next().map(|g| g.id))
    }

    async fn list_group_members(&self, group_id: &str) -> Result<Vec<String>> {
        let members: Vec<DirectoryObject> = self
            .get_all_pages(&format!(
                "groups/{}/members/microsoft.graph.device?$select=id,displayName",
                group_id
            ))
            .await?;

        Ok(members
            .into_iter()
            .filter_map(|m| m.display_name)
            .collect())
    }

    async fn resolve_device(&self, name: &str) -> Result<Vec<String>> {
        let devices: Vec<DirectoryObject> = self
            .get_all_pages(&format!(
                "devices?$filter=displayName eq '{}'&$select=id,displayName",
                odata_literal(name)
            ))
            .await?;

        Ok(devices.into_iter().map(|d| d.id).collect())
    }

    async fn add_member(&self, group_id: &str, member_id: &str) -> Result<Mutation> {
        let reference = json!({
            "@odata.id": format!("{}/directoryObjects/{}", self.base_url(), member_id)
        });

        match self
            .post_no_content(&format!("groups/{}/members/$ref", group_id), &reference)
            .await
        {
            Ok(()) => Ok(Mutation::Applied),
            Err(EduSyncError::GraphApiError { status: 400, message })
                if is_already_member_error(&message) =>
            {
                Ok(Mutation::AlreadyInState)
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_member(&self, group_id: &str, member_id: &str) -> Result<Mutation> {
        match self
            .delete(&format!("groups/{}/members/{}/$ref", group_id, member_id))
            .await
        {
            Ok(()) => Ok(Mutation::Applied),
            Err(e) if e.is_not_found() => Ok(Mutation::AlreadyInState),
            Err(e) => Err(e),
        }
    }
}
