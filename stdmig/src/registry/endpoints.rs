//! Typed registry operations on top of [`RegistryClient`].

use std::collections::BTreeSet;

use serde_json::{Value, json};
use stdmig_common::{
    CatalogTool, OrgRef, Pattern, PatternRecord, PolicyContainer, Repository, SettingsKind,
    ToolConfig, ToolPatch,
};
use tracing::warn;

use super::{Listing, Method, RegistryClient, RegistryError, Transport};

fn seg(value: &str) -> String {
    urlencoding::encode(value).into_owned()
}

pub fn org_path(org: &OrgRef) -> String {
    format!("/organizations/{}/{}", seg(&org.provider), seg(&org.name))
}

pub fn standards_path(org: &OrgRef) -> String {
    format!("{}/coding-standards", org_path(org))
}

pub fn standard_path(org: &OrgRef, standard_id: &str) -> String {
    format!("{}/{}", standards_path(org), seg(standard_id))
}

pub fn tool_path(org: &OrgRef, standard_id: &str, tool_id: &str) -> String {
    format!("{}/tools/{}", standard_path(org, standard_id), seg(tool_id))
}

pub fn quality_settings_path(org: &OrgRef, repository: &str, kind: SettingsKind) -> String {
    format!(
        "{}/repositories/{}/settings/quality/{}",
        org_path(org),
        seg(repository),
        kind.as_str()
    )
}

impl<T: Transport> RegistryClient<T> {
    /// Registry-wide tool catalog.
    pub async fn tool_catalog(&self) -> Result<Vec<CatalogTool>, RegistryError> {
        self.list_all("/tools", None).await
    }

    pub async fn list_standards(
        &self,
        org: &OrgRef,
    ) -> Result<Vec<PolicyContainer>, RegistryError> {
        self.list_all(&standards_path(org), None).await
    }

    pub async fn create_standard(
        &self,
        org: &OrgRef,
        name: &str,
        languages: &BTreeSet<String>,
    ) -> Result<PolicyContainer, RegistryError> {
        let body = json!({ "name": name, "languages": languages });
        // Names carry a timestamp, so a match is the standard an earlier
        // attempt created.
        let landed = move || async move {
            match self.list_standards(org).await {
                Ok(standards) => standards.into_iter().find(|s| s.name == name),
                Err(err) => {
                    warn!(org = %org, error = %err, "Could not check for an existing standard");
                    None
                }
            }
        };
        self.create_once(&standards_path(org), body, landed).await
    }

    /// Make the standard the organization default.
    pub async fn promote_standard(
        &self,
        org: &OrgRef,
        standard_id: &str,
    ) -> Result<(), RegistryError> {
        let path = format!("{}/promote", standard_path(org, standard_id));
        self.request(Method::Post, &path, None, &[]).await?;
        Ok(())
    }

    pub async fn list_tools(
        &self,
        org: &OrgRef,
        standard_id: &str,
    ) -> Result<Vec<ToolConfig>, RegistryError> {
        let path = format!("{}/tools", standard_path(org, standard_id));
        self.list_all(&path, None).await
    }

    pub async fn update_tool(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        patch: &ToolPatch,
    ) -> Result<(), RegistryError> {
        let body = serde_json::to_value(patch).map_err(|e| RegistryError::Decode {
            registry: self.label().to_string(),
            method: Method::Patch,
            path: tool_path(org, standard_id, tool_id),
            message: e.to_string(),
        })?;
        self.request(
            Method::Patch,
            &tool_path(org, standard_id, tool_id),
            Some(body),
            &[],
        )
        .await?;
        Ok(())
    }

    /// Every pattern of a tool, enabled or not.
    pub async fn list_patterns(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        page_cap: Option<usize>,
    ) -> Result<Vec<Pattern>, RegistryError> {
        Ok(self.pattern_listing(org, standard_id, tool_id, page_cap).await?.items)
    }

    /// Patterns of a tool with the truncation flag of a capped walk.
    pub async fn pattern_listing(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        page_cap: Option<usize>,
    ) -> Result<Listing<Pattern>, RegistryError> {
        let path = format!("{}/patterns", tool_path(org, standard_id, tool_id));
        let listing: Listing<PatternRecord> = self.list_pages(&path, page_cap).await?;
        Ok(Listing {
            items: listing.items.into_iter().map(Pattern::from).collect(),
            truncated: listing.truncated,
        })
    }

    pub async fn enabled_patterns(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        page_cap: Option<usize>,
    ) -> Result<Vec<Pattern>, RegistryError> {
        let patterns = self.list_patterns(org, standard_id, tool_id, page_cap).await?;
        Ok(patterns.into_iter().filter(|p| p.enabled).collect())
    }

    pub async fn list_repositories(&self, org: &OrgRef) -> Result<Vec<Repository>, RegistryError> {
        let path = format!("{}/repositories", org_path(org));
        self.list_all(&path, None).await
    }

    /// Quality settings of one category; an absent `data` field reads as `{}`.
    pub async fn quality_settings(
        &self,
        org: &OrgRef,
        repository: &str,
        kind: SettingsKind,
    ) -> Result<Value, RegistryError> {
        let path = quality_settings_path(org, repository, kind);
        let body = self.request(Method::Get, &path, None, &[]).await?;
        Ok(body
            .and_then(|mut v| v.get_mut("data").map(Value::take))
            .unwrap_or_else(|| json!({})))
    }

    /// Replace quality settings; returns the registry's response body.
    pub async fn update_quality_settings(
        &self,
        org: &OrgRef,
        repository: &str,
        kind: SettingsKind,
        settings: &Value,
    ) -> Result<Value, RegistryError> {
        let path = quality_settings_path(org, repository, kind);
        let body = self
            .request(Method::Put, &path, Some(settings.clone()), &[])
            .await?;
        Ok(body.unwrap_or(Value::Null))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::MockRegistry;
    use stdmig_common::config::HttpSettings;

    fn client(mock: &MockRegistry) -> RegistryClient<MockRegistry> {
        RegistryClient::with_transport("dest", mock.clone(), HttpSettings::immediate())
    }

    #[test]
    fn test_paths_are_percent_encoded() {
        let org = OrgRef::new("gh", "acme corp");
        assert_eq!(
            tool_path(&org, "12", "a/b"),
            "/organizations/gh/acme%20corp/coding-standards/12/tools/a%2Fb"
        );
        assert_eq!(
            quality_settings_path(&org, "api", SettingsKind::PullRequests),
            "/organizations/gh/acme%20corp/repositories/api/settings/quality/pull-requests"
        );
    }

    #[tokio::test]
    async fn test_create_and_promote_standard() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "acme");
        let languages = BTreeSet::from(["Java".to_string()]);

        let api = client(&mock);
        let created = api.create_standard(&org, "Migrated: X", &languages).await.unwrap();
        assert_eq!(created.name, "Migrated: X");
        assert!(created.languages.contains("Java"));

        api.promote_standard(&org, &created.id).await.unwrap();
        let standards = api.list_standards(&org).await.unwrap();
        assert!(standards.iter().any(|s| s.id == created.id && s.is_default));
    }

    #[tokio::test]
    async fn test_lost_create_response_does_not_duplicate_standard() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "acme");
        let path = standards_path(&org);
        mock.lose_responses(Method::Post, &path, 502, 1);

        let created = client(&mock)
            .create_standard(&org, "Migrated: X_1700000000", &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(created.name, "Migrated: X_1700000000");
        assert_eq!(mock.standards(&org).len(), 1);
        assert_eq!(mock.standards(&org)[0].id, created.id);
        assert_eq!(mock.count_calls(Method::Post, &path), 1);
    }

    #[tokio::test]
    async fn test_failed_create_is_resent_when_nothing_landed() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "acme");
        let path = standards_path(&org);
        mock.fail_requests(Method::Post, &path, 503, 2);

        let created = client(&mock)
            .create_standard(&org, "Migrated: Y_1700000000", &BTreeSet::new())
            .await
            .unwrap();

        assert_eq!(mock.standards(&org).len(), 1);
        assert_eq!(mock.standards(&org)[0].id, created.id);
        assert_eq!(mock.count_calls(Method::Post, &path), 3);
        assert_eq!(mock.count_calls(Method::Get, &path), 2);
    }

    #[tokio::test]
    async fn test_enabled_patterns_filters_disabled() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "acme");
        mock.add_standard(&org, "cs", "Source", &["Java"]);
        mock.set_tool(
            &org,
            "cs",
            "t1",
            Some("PMD"),
            true,
            vec![
                crate::registry::mock::pattern("p1", true),
                crate::registry::mock::pattern("p2", false),
            ],
        );

        let enabled = client(&mock)
            .enabled_patterns(&org, "cs", "t1", None)
            .await
            .unwrap();
        let ids: Vec<&str> = enabled.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, ["p1"]);
    }

    #[tokio::test]
    async fn test_quality_settings_round_trip() {
        let mock = MockRegistry::new();
        let org = OrgRef::new("gh", "acme");
        mock.add_repository(&org, "api");
        let api = client(&mock);

        let settings = json!({"issueThreshold": {"threshold": 0}});
        api.update_quality_settings(&org, "api", SettingsKind::Commits, &settings)
            .await
            .unwrap();
        let read = api
            .quality_settings(&org, "api", SettingsKind::Commits)
            .await
            .unwrap();
        assert_eq!(read, settings);

        let empty = api
            .quality_settings(&org, "api", SettingsKind::Repository)
            .await
            .unwrap();
        assert_eq!(empty, json!({}));
    }
}
