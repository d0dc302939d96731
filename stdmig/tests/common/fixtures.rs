use std::collections::BTreeSet;

use stdmig::registry::mock::pattern;
use stdmig::{MockRegistry, RegistryClient};
use stdmig_common::config::HttpSettings;
use stdmig_common::{OrgRef, Pattern};

pub const SOURCE_STANDARD: &str = "s1";

/// A source registry seeded with one default standard and an empty
/// destination registry sharing a tool catalog.
pub struct Registries {
    pub source: MockRegistry,
    pub destination: MockRegistry,
    pub source_org: OrgRef,
}

impl Registries {
    pub fn new() -> Self {
        Self::with_page_size(100)
    }

    pub fn with_page_size(size: usize) -> Self {
        let source_org = OrgRef::new("gh", "self-hosted");
        let source = MockRegistry::new().with_page_size(size);
        source.add_default_standard(
            &source_org,
            SOURCE_STANDARD,
            "Backend",
            &["Java", "JavaScript"],
        );
        source.add_standard(&source_org, "s2", "Frontend", &["TypeScript"]);
        Self {
            source,
            destination: MockRegistry::new().with_page_size(size),
            source_org,
        }
    }

    /// Enabled source tool with the given enabled patterns.
    pub fn source_tool(&self, id: &str, name: &str, patterns: Vec<Pattern>) {
        self.source
            .set_tool(&self.source_org, SOURCE_STANDARD, id, Some(name), true, patterns);
    }

    pub fn source_client(&self) -> RegistryClient<MockRegistry> {
        client("source", &self.source)
    }

    pub fn destination_client(&self) -> RegistryClient<MockRegistry> {
        client("destination", &self.destination)
    }
}

pub fn client(label: &str, mock: &MockRegistry) -> RegistryClient<MockRegistry> {
    RegistryClient::with_transport(label, mock.clone(), HttpSettings::immediate())
}

/// `count` enabled patterns named `{prefix}0..`.
pub fn numbered_patterns(prefix: &str, count: usize) -> Vec<Pattern> {
    (0..count)
        .map(|i| pattern(&format!("{prefix}{i}"), true))
        .collect()
}

pub fn pattern_ids(patterns: &[Pattern]) -> BTreeSet<String> {
    patterns.iter().map(|p| p.id.clone()).collect()
}
