//! Well-known Gmail label markers

use serde::{Deserialize, Serialize};

/// Unique identifier for a label (Gmail label ID)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LabelId(pub String);

impl LabelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    // Gmail system labels the sync derives flags from
    pub const INBOX: &'static str = "INBOX";
    pub const STARRED: &'static str = "STARRED";
    pub const UNREAD: &'static str = "UNREAD";

    /// Whether a label set marks the message as read (no UNREAD marker)
    pub fn is_read(label_ids: &[String]) -> bool {
        !label_ids.iter().any(|l| l == Self::UNREAD)
    }

    /// Whether a label set carries the STARRED marker
    pub fn is_starred(label_ids: &[String]) -> bool {
        label_ids.iter().any(|l| l == Self::STARRED)
    }
}

impl From<&str> for LabelId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_read_flag() {
        assert!(LabelId::is_read(&labels(&["INBOX"])));
        assert!(!LabelId::is_read(&labels(&["INBOX", "UNREAD"])));
        assert!(LabelId::is_read(&[]));
    }

    #[test]
    fn test_starred_flag() {
        assert!(LabelId::is_starred(&labels(&["STARRED", "UNREAD"])));
        assert!(!LabelId::is_starred(&labels(&["INBOX"])));
    }

    #[test]
    fn test_markers_are_case_sensitive() {
        // Gmail system label IDs are always upper-case
        assert!(LabelId::is_read(&labels(&["unread"])));
        assert!(!LabelId::is_starred(&labels(&["starred"])));
    }
}
