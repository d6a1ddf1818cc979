use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A unit of work progressing through a cascade's stages.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkItem {
    pub id: String,
    pub title: String,
    pub content: String,
    pub cascade: String,
    pub stage: String,
    /// 0 = highest urgency, 4 = lowest.
    pub priority: i64,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pr_number: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_doc_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Derived on read, never persisted: true when a `blocks` dependency
    /// points at a work item that has not reached its terminal stage.
    #[serde(default)]
    pub is_blocked: bool,
    /// Derived on read: the ids of the blocking items.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub blocked_by: Vec<String>,
}

/// Dependency edge kinds. Only `Blocks` affects readiness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DepType {
    Blocks,
    Related,
    DiscoveredFrom,
}

impl DepType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepType::Blocks => "blocks",
            DepType::Related => "related",
            DepType::DiscoveredFrom => "discovered-from",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "blocks" => Some(DepType::Blocks),
            "related" => Some(DepType::Related),
            "discovered-from" => Some(DepType::DiscoveredFrom),
            _ => None,
        }
    }
}

/// A directed dependency edge between two work items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkDep {
    pub work_id: String,
    pub depends_on: String,
    pub dep_type: DepType,
    pub created_at: DateTime<Utc>,
}

/// Append-only audit record of a stage change.
///
/// The first transition of every item has `from_stage = None`; the ordered
/// sequence per item is its authoritative history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkTransition {
    pub id: i64,
    pub work_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_stage: Option<String>,
    pub to_stage: String,
    pub transitioned_by: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_snapshot: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a new work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWorkInput {
    pub title: String,
    pub cascade: String,
    /// Defaults to the cascade's first stage.
    pub stage: Option<String>,
    pub content: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: i64,
    #[serde(default = "default_item_type", rename = "type")]
    pub item_type: String,
    pub parent_id: Option<String>,
    /// Each entry becomes one `blocks` edge.
    #[serde(default)]
    pub depends_on: Vec<String>,
    pub project: Option<String>,
    /// Recorded as `transitioned_by` on the creation transition.
    pub created_by: Option<String>,
}

fn default_priority() -> i64 {
    3
}

fn default_item_type() -> String {
    "task".to_string()
}

/// Partial update input; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkInput {
    pub title: Option<String>,
    pub content: Option<String>,
    pub priority: Option<i64>,
    #[serde(rename = "type")]
    pub item_type: Option<String>,
    pub project: Option<String>,
    pub pr_number: Option<i64>,
    pub output_doc_id: Option<String>,
}

/// Generate a stable work item id from the title and creation time.
pub fn generate_work_id(title: &str, created_at: DateTime<Utc>) -> String {
    let slug: String = title
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let slug = slug.trim_matches('-').to_string();
    let mut compact = String::new();
    let mut prev_dash = false;
    for c in slug.chars().take(40) {
        if c == '-' {
            if !prev_dash {
                compact.push('-');
            }
            prev_dash = true;
        } else {
            compact.push(c);
            prev_dash = false;
        }
    }
    let compact = compact.trim_matches('-');
    if compact.is_empty() {
        format!("work-{}", created_at.timestamp_millis())
    } else {
        format!("{}-{}", compact, created_at.timestamp_millis())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_work_id_slug() {
        let now = Utc::now();
        let id = generate_work_id("Fix the  Login page!", now);
        assert!(id.starts_with("fix-the-login-page-"));
        assert!(id.ends_with(&now.timestamp_millis().to_string()));
    }

    #[test]
    fn test_generate_work_id_empty_title() {
        let now = Utc::now();
        let id = generate_work_id("???", now);
        assert!(id.starts_with("work-"));
    }

    #[test]
    fn test_dep_type_round_trip() {
        for t in [DepType::Blocks, DepType::Related, DepType::DiscoveredFrom] {
            assert_eq!(DepType::parse(t.as_str()), Some(t));
        }
        assert_eq!(DepType::parse("unknown"), None);
    }
}
