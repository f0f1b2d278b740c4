use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle state reported while a build is executing.
pub const RUNNING_STATE: &str = "running";

/// TeamCity's marker for the default branch.
pub const DEFAULT_BRANCH_MARKER: &str = "<default>";

/// A build configuration or a single build; both are looked up by `id:`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildRef {
    /// Build configuration (build type) id, e.g. `Project_Checks`.
    Configuration(String),
    /// Build id of a queued, running or finished build.
    Build(String),
}

impl BuildRef {
    /// REST path of the locator; the id is percent-encoded so it stays one
    /// path segment.
    pub fn rest_path(&self) -> String {
        match self {
            Self::Configuration(id) => {
                format!("httpAuth/app/rest/buildTypes/id:{}", urlencoding::encode(id))
            }
            Self::Build(id) => format!("httpAuth/app/rest/builds/id:{}", urlencoding::encode(id)),
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Self::Configuration(id) | Self::Build(id) => id,
        }
    }
}

/// Point-in-time view of a build or build configuration.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSnapshot {
    pub build_type_id: Option<String>,
    pub branch_name: Option<String>,
    pub state: Option<String>,
    /// Change ids in the order the server listed them.
    pub changes: Vec<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct BuildDetails {
    id: Option<Value>,
    build_type_id: Option<String>,
    branch_name: Option<String>,
    state: Option<String>,
    last_changes: Option<ChangeList>,
}

#[derive(Deserialize)]
struct ChangeList {
    #[serde(default)]
    change: Vec<ChangeEntry>,
}

#[derive(Deserialize)]
struct ChangeEntry {
    id: Option<Value>,
}

impl BuildSnapshot {
    /// Reads the fields of a `builds/id:` or `buildTypes/id:` JSON response.
    ///
    /// Returns `None` for anything that is not a non-empty object. For a
    /// configuration the configuration's own `id` is its build type id.
    pub fn from_value(build: &BuildRef, value: &Value) -> Option<Self> {
        if value.as_object().map_or(true, |object| object.is_empty()) {
            return None;
        }

        let details: BuildDetails = serde_json::from_value(value.clone()).ok()?;

        let build_type_id = match build {
            BuildRef::Configuration(_) => {
                details.build_type_id.or_else(|| details.id.as_ref().and_then(id_string))
            }
            BuildRef::Build(_) => details.build_type_id,
        };

        let changes = details
            .last_changes
            .map(|list| {
                list.change
                    .iter()
                    .filter_map(|change| change.id.as_ref().and_then(id_string))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            build_type_id,
            branch_name: details.branch_name,
            state: details.state,
            changes,
        })
    }

    pub fn is_running(&self) -> bool {
        self.state.as_deref() == Some(RUNNING_STATE)
    }
}

/// TeamCity reports ids as numbers in JSON and as strings in XML.
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}

/// Picks the base change among a build's changes: numeric maximum when every
/// id is an unsigned integer, lexicographic maximum otherwise.
pub fn latest_change(ids: &[String]) -> Option<String> {
    let numeric: Option<Vec<u64>> = ids.iter().map(|id| id.parse().ok()).collect();

    match numeric {
        Some(values) => values
            .into_iter()
            .zip(ids)
            .max_by_key(|(value, _)| *value)
            .map(|(_, id)| id.clone()),
        None => ids.iter().max().cloned(),
    }
}

/// Build to put into the queue.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TriggerRequest {
    pub build_type_id: String,
    /// Empty or `<default>` for the default branch.
    pub branch: String,
    pub queue_at_top: bool,
    pub comment: Option<String>,
    /// Change the build is pinned to.
    pub base_change: Option<String>,
    /// Serialized in insertion order.
    pub properties: IndexMap<String, String>,
}

impl TriggerRequest {
    pub fn new(build_type_id: impl Into<String>) -> Self {
        Self {
            build_type_id: build_type_id.into(),
            ..Self::default()
        }
    }

    /// Branch as sent to the server; the default branch is the empty string.
    pub fn branch_name(&self) -> &str {
        if self.branch == DEFAULT_BRANCH_MARKER {
            ""
        } else {
            &self.branch
        }
    }
}

/// The queued build returned by `buildQueue`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggeredBuild {
    pub id: Option<String>,
    pub href: String,
    pub web_url: Option<String>,
    pub state: Option<String>,
}

impl TriggeredBuild {
    /// Reads the flattened `build` entry; `None` when it has no `href`.
    pub fn from_value(build: &Value) -> Option<Self> {
        let field = |name: &str| build.get(name).and_then(Value::as_str).map(str::to_owned);

        Some(Self {
            href: field("href")?,
            id: field("id"),
            web_url: field("webUrl"),
            state: field("state"),
        })
    }
}
