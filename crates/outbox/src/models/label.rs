//! Label model: hierarchical Gmail label paths and their cached IDs

use serde::{Deserialize, Serialize};

/// Root label for tender correspondence
pub const TENDERING_ROOT: &str = "Tendering";

/// Cached mapping from a user's full label path to the provider label ID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelBinding {
    pub user_id: i64,
    /// Full hierarchical path, e.g. "Tendering/TeamA/TenderX"
    pub label_name: String,
    pub label_id: String,
}

impl LabelBinding {
    pub fn new(user_id: i64, label_name: impl Into<String>, label_id: impl Into<String>) -> Self {
        Self {
            user_id,
            label_name: label_name.into(),
            label_id: label_id.into(),
        }
    }
}

/// Every ancestor of a label path, outermost first, ending with the path itself
///
/// `"A/B/C"` yields `["A", "A/B", "A/B/C"]`. Empty segments are ignored.
pub fn label_ancestors(label_path: &str) -> Vec<String> {
    let mut ancestors = Vec::new();
    let mut current = String::new();

    for segment in label_path.split('/').map(str::trim).filter(|s| !s.is_empty()) {
        if !current.is_empty() {
            current.push('/');
        }
        current.push_str(segment);
        ancestors.push(current.clone());
    }

    ancestors
}

/// Make a string safe to use as a single label segment
pub fn sanitize_segment(segment: &str) -> String {
    segment
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '-',
            other => other,
        })
        .collect::<String>()
        .trim()
        .to_string()
}

/// Label path used for all mail about one tender
pub fn tender_label_path(team_name: &str, tender_name: &str) -> String {
    format!(
        "{}/{}/{}",
        TENDERING_ROOT,
        sanitize_segment(team_name),
        sanitize_segment(tender_name)
    )
}
