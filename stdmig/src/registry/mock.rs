//! Deterministic in-memory registry for tests.
//!
//! Implements [`Transport`] by routing requests onto a small stateful model
//! of the registry API: tool catalog, coding standards with tools and
//! patterns, repositories with quality settings. Faults can be scripted per
//! path or per pattern id, and every request is recorded.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use stdmig_common::{
    CatalogTool, OrgRef, Pattern, PolicyContainer, SettingsKind, ToolConfig, ToolPatch,
};

use super::transport::{Method, RawResponse, RegistryRequest, Transport, TransportFailure};

/// A request as seen by the mock.
pub type RecordedCall = RegistryRequest;

const DEFAULT_PAGE_SIZE: usize = 100;
const FIRST_CREATED_ID: u64 = 1000;

/// Build a pattern fixture.
pub fn pattern(id: &str, enabled: bool) -> Pattern {
    Pattern {
        id: id.to_string(),
        category: Some("CodeStyle".to_string()),
        severity: Some("Warning".to_string()),
        enabled,
        parameters: Vec::new(),
    }
}

#[derive(Debug, Clone, Copy)]
enum FaultKind {
    Status(u16),
    Transport,
    /// The request takes effect but the caller sees the status.
    LostResponse(u16),
}

#[derive(Debug, Clone)]
struct Fault {
    method: Method,
    path: String,
    kind: FaultKind,
    remaining: u32,
}

/// Remaining occurrences of a per-pattern fault; `None` never runs out.
type Budget = Option<u32>;

fn consume(budget: &mut Budget) -> bool {
    match budget {
        None => true,
        Some(0) => false,
        Some(n) => {
            *n -= 1;
            true
        }
    }
}

#[derive(Debug, Clone)]
struct ToolTemplate {
    name: String,
    enabled_by_default: bool,
    patterns: Vec<Pattern>,
}

#[derive(Debug, Clone, Default)]
struct MockTool {
    name: Option<String>,
    enabled: bool,
    patterns: BTreeMap<String, Pattern>,
}

#[derive(Debug, Clone)]
struct MockStandard {
    container: PolicyContainer,
    tools: BTreeMap<String, MockTool>,
}

#[derive(Debug, Clone, Default)]
struct MockOrg {
    standards: Vec<MockStandard>,
    repositories: BTreeMap<String, BTreeMap<SettingsKind, Value>>,
}

impl MockOrg {
    fn standard_mut(&mut self, id: &str) -> Option<&mut MockStandard> {
        self.standards.iter_mut().find(|s| s.container.id == id)
    }
}

#[derive(Debug, Default)]
struct MockState {
    catalog: Vec<CatalogTool>,
    templates: BTreeMap<String, ToolTemplate>,
    orgs: BTreeMap<OrgRef, MockOrg>,
    faults: Vec<Fault>,
    dropped_writes: BTreeMap<String, Budget>,
    rejected_writes: BTreeMap<String, (u16, Budget)>,
    calls: Vec<RecordedCall>,
    next_id: u64,
}

impl MockState {
    fn take_fault(&mut self, request: &RegistryRequest) -> Option<FaultKind> {
        let fault = self
            .faults
            .iter_mut()
            .find(|f| f.method == request.method && f.path == request.path && f.remaining > 0)?;
        fault.remaining -= 1;
        Some(fault.kind)
    }

    fn org_mut(&mut self, org: &OrgRef) -> &mut MockOrg {
        self.orgs.entry(org.clone()).or_default()
    }

    fn tool_mut(
        &mut self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
    ) -> Option<&mut MockTool> {
        self.orgs
            .get_mut(org)?
            .standard_mut(standard_id)?
            .tools
            .get_mut(tool_id)
    }

    fn tool(&self, org: &OrgRef, standard_id: &str, tool_id: &str) -> Option<&MockTool> {
        self.orgs
            .get(org)?
            .standards
            .iter()
            .find(|s| s.container.id == standard_id)?
            .tools
            .get(tool_id)
    }
}

/// In-memory registry. Clones share state.
#[derive(Debug, Clone)]
pub struct MockRegistry {
    state: Arc<Mutex<MockState>>,
    page_size: usize,
}

impl Default for MockRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MockRegistry {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                next_id: FIRST_CREATED_ID,
                ..MockState::default()
            })),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Serve list endpoints in pages of at most `size` items.
    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Fixtures

    pub fn add_catalog_tool(&self, id: impl Into<String>, name: impl Into<String>) {
        self.lock().catalog.push(CatalogTool {
            id: id.into(),
            name: name.into(),
        });
    }

    /// Catalog tool that every newly created standard starts with.
    pub fn add_destination_tool(
        &self,
        id: &str,
        name: &str,
        enabled_by_default: bool,
        patterns: Vec<Pattern>,
    ) {
        let mut state = self.lock();
        state.catalog.push(CatalogTool {
            id: id.to_string(),
            name: name.to_string(),
        });
        state.templates.insert(
            id.to_string(),
            ToolTemplate {
                name: name.to_string(),
                enabled_by_default,
                patterns,
            },
        );
    }

    pub fn add_standard(&self, org: &OrgRef, id: &str, name: &str, languages: &[&str]) {
        self.insert_standard(org, id, name, languages, false, false);
    }

    pub fn add_draft_standard(&self, org: &OrgRef, id: &str, name: &str) {
        self.insert_standard(org, id, name, &[], true, false);
    }

    pub fn add_default_standard(&self, org: &OrgRef, id: &str, name: &str, languages: &[&str]) {
        self.insert_standard(org, id, name, languages, false, true);
    }

    fn insert_standard(
        &self,
        org: &OrgRef,
        id: &str,
        name: &str,
        languages: &[&str],
        is_draft: bool,
        is_default: bool,
    ) {
        self.lock().org_mut(org).standards.push(MockStandard {
            container: PolicyContainer {
                id: id.to_string(),
                name: name.to_string(),
                languages: languages.iter().map(|l| l.to_string()).collect(),
                is_draft,
                is_default,
            },
            tools: BTreeMap::new(),
        });
    }

    /// Set a tool inside a standard, replacing any previous state.
    pub fn set_tool(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        name: Option<&str>,
        enabled: bool,
        patterns: Vec<Pattern>,
    ) {
        let mut state = self.lock();
        if let Some(standard) = state.org_mut(org).standard_mut(standard_id) {
            standard.tools.insert(
                tool_id.to_string(),
                MockTool {
                    name: name.map(str::to_string),
                    enabled,
                    patterns: patterns.into_iter().map(|p| (p.id.clone(), p)).collect(),
                },
            );
        }
    }

    pub fn add_repository(&self, org: &OrgRef, name: &str) {
        self.lock()
            .org_mut(org)
            .repositories
            .entry(name.to_string())
            .or_default();
    }

    pub fn set_quality_settings(
        &self,
        org: &OrgRef,
        repository: &str,
        kind: SettingsKind,
        value: Value,
    ) {
        self.lock()
            .org_mut(org)
            .repositories
            .entry(repository.to_string())
            .or_default()
            .insert(kind, value);
    }

    // Faults

    /// Answer the next `times` matching requests with `status`.
    pub fn fail_requests(&self, method: Method, path: &str, status: u16, times: u32) {
        self.lock().faults.push(Fault {
            method,
            path: path.to_string(),
            kind: FaultKind::Status(status),
            remaining: times,
        });
    }

    /// Apply the next `times` matching requests, then answer them with
    /// `status` as if the response had been lost on the way back.
    pub fn lose_responses(&self, method: Method, path: &str, status: u16, times: u32) {
        self.lock().faults.push(Fault {
            method,
            path: path.to_string(),
            kind: FaultKind::LostResponse(status),
            remaining: times,
        });
    }

    /// Fail the next `times` matching requests before any status is produced.
    pub fn fail_transport(&self, method: Method, path: &str, times: u32) {
        self.lock().faults.push(Fault {
            method,
            path: path.to_string(),
            kind: FaultKind::Transport,
            remaining: times,
        });
    }

    /// Accept writes enabling `pattern_id` but silently leave it untouched.
    /// `times: None` drops every write.
    pub fn drop_pattern_writes(&self, pattern_id: &str, times: Option<u32>) {
        self.lock()
            .dropped_writes
            .insert(pattern_id.to_string(), times);
    }

    /// Answer any write enabling `pattern_id` with HTTP 500.
    pub fn reject_pattern_writes(&self, pattern_id: &str, times: Option<u32>) {
        self.reject_pattern_writes_with(pattern_id, 500, times);
    }

    /// Answer any write enabling `pattern_id` with `status`.
    pub fn reject_pattern_writes_with(&self, pattern_id: &str, status: u16, times: Option<u32>) {
        self.lock()
            .rejected_writes
            .insert(pattern_id.to_string(), (status, times));
    }

    // Inspection

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.lock().calls.clone()
    }

    pub fn count_calls(&self, method: Method, path: &str) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }

    pub fn standards(&self, org: &OrgRef) -> Vec<PolicyContainer> {
        self.lock()
            .orgs
            .get(org)
            .map(|o| o.standards.iter().map(|s| s.container.clone()).collect())
            .unwrap_or_default()
    }

    pub fn tool_enabled(&self, org: &OrgRef, standard_id: &str, tool_id: &str) -> bool {
        self.lock()
            .tool(org, standard_id, tool_id)
            .is_some_and(|t| t.enabled)
    }

    pub fn enabled_tool_ids(&self, org: &OrgRef, standard_id: &str) -> BTreeSet<String> {
        let state = self.lock();
        state
            .orgs
            .get(org)
            .and_then(|o| o.standards.iter().find(|s| s.container.id == standard_id))
            .map(|s| {
                s.tools
                    .iter()
                    .filter(|(_, t)| t.enabled)
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn enabled_pattern_ids(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
    ) -> BTreeSet<String> {
        self.lock()
            .tool(org, standard_id, tool_id)
            .map(|t| {
                t.patterns
                    .values()
                    .filter(|p| p.enabled)
                    .map(|p| p.id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn pattern_state(
        &self,
        org: &OrgRef,
        standard_id: &str,
        tool_id: &str,
        pattern_id: &str,
    ) -> Option<Pattern> {
        self.lock()
            .tool(org, standard_id, tool_id)?
            .patterns
            .get(pattern_id)
            .cloned()
    }

    pub fn quality_settings(
        &self,
        org: &OrgRef,
        repository: &str,
        kind: SettingsKind,
    ) -> Option<Value> {
        self.lock()
            .orgs
            .get(org)?
            .repositories
            .get(repository)?
            .get(&kind)
            .cloned()
    }

    // Routing

    fn handle(&self, request: &RegistryRequest) -> Result<RawResponse, TransportFailure> {
        let mut state = self.lock();
        state.calls.push(request.clone());

        let lost = match state.take_fault(request) {
            Some(FaultKind::Status(status)) => return Ok(injected(status)),
            Some(FaultKind::Transport) => {
                return Err(TransportFailure::Connect("injected connection reset".into()));
            }
            Some(FaultKind::LostResponse(status)) => Some(status),
            None => None,
        };

        let segments: Vec<String> = request
            .path
            .trim_start_matches('/')
            .split('/')
            .map(|s| {
                urlencoding::decode(s)
                    .map(|d| d.into_owned())
                    .unwrap_or_else(|_| s.to_string())
            })
            .collect();
        let segs: Vec<&str> = segments.iter().map(String::as_str).collect();

        let response = match (request.method, segs.as_slice()) {
            (Method::Get, ["tools"]) => {
                let items = state
                    .catalog
                    .iter()
                    .map(|t| json!({"uuid": t.id, "name": t.name}))
                    .collect();
                self.paginate(items, request)
            }
            (Method::Get, ["organizations", p, o, "coding-standards"]) => {
                let org = OrgRef::new(*p, *o);
                let items = state
                    .orgs
                    .get(&org)
                    .map(|o| {
                        o.standards
                            .iter()
                            .map(|s| json!(s.container))
                            .collect()
                    })
                    .unwrap_or_default();
                self.paginate(items, request)
            }
            (Method::Post, ["organizations", p, o, "coding-standards"]) => {
                create_standard(&mut state, &OrgRef::new(*p, *o), request.body.as_ref())
            }
            (Method::Post, ["organizations", p, o, "coding-standards", id, "promote"]) => {
                let org = state.org_mut(&OrgRef::new(*p, *o));
                if org.standard_mut(id).is_none() {
                    not_found()
                } else {
                    for standard in &mut org.standards {
                        standard.container.is_default = standard.container.id == *id;
                    }
                    RawResponse::new(204, "")
                }
            }
            (Method::Get, ["organizations", p, o, "coding-standards", id, "tools"]) => {
                let org = OrgRef::new(*p, *o);
                match state.orgs.get(&org).and_then(|o| {
                    o.standards.iter().find(|s| s.container.id == *id)
                }) {
                    Some(standard) => {
                        let items = standard
                            .tools
                            .iter()
                            .map(|(tool_id, tool)| {
                                json!(ToolConfig {
                                    id: tool_id.clone(),
                                    name: tool.name.clone(),
                                    enabled: tool.enabled,
                                })
                            })
                            .collect();
                        self.paginate(items, request)
                    }
                    None => not_found(),
                }
            }
            (Method::Patch, ["organizations", p, o, "coding-standards", id, "tools", tool]) => {
                patch_tool(&mut state, &OrgRef::new(*p, *o), id, tool, request.body.as_ref())
            }
            (
                Method::Get,
                ["organizations", p, o, "coding-standards", id, "tools", tool, "patterns"],
            ) => match state.tool(&OrgRef::new(*p, *o), id, tool) {
                Some(tool) => {
                    let items = tool
                        .patterns
                        .values()
                        .map(|p| {
                            json!({
                                "patternDefinition": {
                                    "id": p.id,
                                    "category": p.category,
                                    "level": p.severity,
                                },
                                "enabled": p.enabled,
                                "parameters": p.parameters,
                            })
                        })
                        .collect();
                    self.paginate(items, request)
                }
                None => not_found(),
            },
            (Method::Get, ["organizations", p, o, "repositories"]) => {
                let items = state
                    .orgs
                    .get(&OrgRef::new(*p, *o))
                    .map(|o| o.repositories.keys().map(|name| json!({"name": name})).collect())
                    .unwrap_or_default();
                self.paginate(items, request)
            }
            (
                method @ (Method::Get | Method::Put),
                ["organizations", p, o, "repositories", repo, "settings", "quality", kind],
            ) => {
                let Some(kind) = SettingsKind::ALL.into_iter().find(|k| k.as_str() == *kind) else {
                    return Ok(not_found());
                };
                let org = OrgRef::new(*p, *o);
                let Some(settings) = state
                    .orgs
                    .get_mut(&org)
                    .and_then(|o| o.repositories.get_mut(*repo))
                else {
                    return Ok(not_found());
                };
                if method == Method::Put {
                    let body = request.body.clone().unwrap_or_else(|| json!({}));
                    settings.insert(kind, body.clone());
                    RawResponse::json(200, &json!({"data": body}))
                } else {
                    let value = settings.get(&kind).cloned().unwrap_or_else(|| json!({}));
                    RawResponse::json(200, &json!({"data": value}))
                }
            }
            _ => not_found(),
        };

        Ok(lost.map_or(response, injected))
    }

    fn paginate(&self, items: Vec<Value>, request: &RegistryRequest) -> RawResponse {
        let param = |name: &str| {
            request
                .query
                .iter()
                .find(|(k, _)| k == name)
                .and_then(|(_, v)| v.parse::<usize>().ok())
        };
        let size = param("limit")
            .unwrap_or(self.page_size)
            .min(self.page_size)
            .max(1);
        let offset = param("cursor").unwrap_or(0);
        let page: Vec<Value> = items.iter().skip(offset).take(size).cloned().collect();
        let next = offset + size;
        let cursor = (next < items.len()).then(|| next.to_string());
        RawResponse::json(
            200,
            &json!({"data": page, "pagination": {"cursor": cursor, "limit": size}}),
        )
    }
}

fn not_found() -> RawResponse {
    RawResponse::json(404, &json!({"error": "not found"}))
}

fn injected(status: u16) -> RawResponse {
    RawResponse::json(status, &json!({"error": format!("injected {status}")}))
}

fn bad_request(message: &str) -> RawResponse {
    RawResponse::json(400, &json!({"error": message}))
}

fn create_standard(state: &mut MockState, org: &OrgRef, body: Option<&Value>) -> RawResponse {
    let Some(body) = body else {
        return bad_request("missing body");
    };
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return bad_request("missing name");
    };
    let languages = body
        .get("languages")
        .and_then(Value::as_array)
        .map(|langs| {
            langs
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let id = state.next_id.to_string();
    state.next_id += 1;
    let container = PolicyContainer {
        id,
        name: name.to_string(),
        languages,
        is_draft: false,
        is_default: false,
    };
    let tools = state
        .templates
        .iter()
        .map(|(tool_id, template)| {
            (
                tool_id.clone(),
                MockTool {
                    name: Some(template.name.clone()),
                    enabled: template.enabled_by_default,
                    patterns: template
                        .patterns
                        .iter()
                        .map(|p| (p.id.clone(), p.clone()))
                        .collect(),
                },
            )
        })
        .collect();

    state.org_mut(org).standards.push(MockStandard {
        container: container.clone(),
        tools,
    });
    RawResponse::json(201, &json!({"data": container}))
}

fn patch_tool(
    state: &mut MockState,
    org: &OrgRef,
    standard_id: &str,
    tool_id: &str,
    body: Option<&Value>,
) -> RawResponse {
    let Some(patch) = body.and_then(|b| serde_json::from_value::<ToolPatch>(b.clone()).ok()) else {
        return bad_request("invalid tool update");
    };
    if state.tool(org, standard_id, tool_id).is_none() {
        return not_found();
    }

    let mut rejected = None;
    for update in patch.patterns.iter().filter(|u| u.enabled) {
        if let Some((status, budget)) = state.rejected_writes.get_mut(&update.id)
            && consume(budget)
        {
            rejected = Some(*status);
        }
    }
    if let Some(status) = rejected {
        return RawResponse::json(status, &json!({"error": "pattern update failed"}));
    }

    let mut dropped = BTreeSet::new();
    for update in patch.patterns.iter().filter(|u| u.enabled) {
        if let Some(budget) = state.dropped_writes.get_mut(&update.id)
            && consume(budget)
        {
            dropped.insert(update.id.clone());
        }
    }

    let Some(tool) = state.tool_mut(org, standard_id, tool_id) else {
        return not_found();
    };
    tool.enabled = patch.enabled;
    for update in patch.patterns {
        if dropped.contains(&update.id) {
            continue;
        }
        let entry = tool
            .patterns
            .entry(update.id.clone())
            .or_insert_with(|| Pattern {
                id: update.id.clone(),
                category: None,
                severity: None,
                enabled: false,
                parameters: Vec::new(),
            });
        entry.enabled = update.enabled;
        if !update.parameters.is_empty() {
            entry.parameters = update.parameters;
        }
    }
    RawResponse::new(204, "")
}

impl Transport for MockRegistry {
    async fn send(&self, request: &RegistryRequest) -> Result<RawResponse, TransportFailure> {
        self.handle(request)
    }
}
