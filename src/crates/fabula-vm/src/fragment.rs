//! Journal fragments: the user-visible output of a step

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;
use uuid::Uuid;

use fabula_core::record::Record;

use crate::error::{Result, VmError};

/// One piece of composed journal content.
///
/// The JOURNAL phase reduces to a list of fragments; the ledger persists
/// each as a `fragment`-channel record inside the step's marker section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fragment {
    /// Stable identity
    pub uid: Uuid,

    /// The rendered content
    pub content: String,

    /// Kind of content: `"line"`, `"heading"`, `"choice"`, ...
    #[serde(default = "default_fragment_type")]
    pub fragment_type: String,

    /// Node the content was composed for, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<Uuid>,

    /// Label of that node at composition time
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_label: Option<String>,

    /// Tag set
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,
}

fn default_fragment_type() -> String {
    "line".to_string()
}

impl Fragment {
    /// A plain line of content
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            uid: Uuid::new_v4(),
            content: content.into(),
            fragment_type: default_fragment_type(),
            source_id: None,
            source_label: None,
            tags: BTreeSet::new(),
        }
    }

    /// Builder: record which node this was composed for
    pub fn with_source(mut self, source_id: Uuid, source_label: Option<String>) -> Self {
        self.source_id = Some(source_id);
        self.source_label = source_label;
        self
    }

    /// Builder: set the fragment type
    pub fn typed(mut self, fragment_type: impl Into<String>) -> Self {
        self.fragment_type = fragment_type.into();
        self
    }

    /// Encode as a stream record on the `fragment` channel
    pub fn to_record(&self) -> Record {
        Record::new(
            "fragment",
            json!({
                "content": self.content,
                "fragment_type": self.fragment_type,
                "source_id": self.source_id,
                "source_label": self.source_label,
            }),
        )
        .on_channel("fragment")
    }

    /// Decode from a stream record
    pub fn from_record(record: &Record) -> Result<Fragment> {
        if !record.has_channel("fragment") {
            return Err(VmError::replay_failed(format!(
                "record {} is not a fragment",
                record.uid
            )));
        }
        Ok(Fragment {
            uid: record.uid,
            content: record.payload["content"]
                .as_str()
                .unwrap_or_default()
                .to_string(),
            fragment_type: record.payload["fragment_type"]
                .as_str()
                .unwrap_or("line")
                .to_string(),
            source_id: record.payload["source_id"]
                .as_str()
                .and_then(|s| Uuid::parse_str(s).ok()),
            source_label: record.payload["source_label"]
                .as_str()
                .map(str::to_string),
            tags: record.tags.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_round_trip() {
        let source = Uuid::new_v4();
        let frag = Fragment::new("[step 3] camp").with_source(source, Some("camp".into()));
        let record = frag.to_record();
        assert!(record.has_channel("fragment"));

        let back = Fragment::from_record(&record).unwrap();
        assert_eq!(back.content, "[step 3] camp");
        assert_eq!(back.source_id, Some(source));
        assert_eq!(back.source_label.as_deref(), Some("camp"));
    }

    #[test]
    fn non_fragment_record_rejected() {
        let record = Record::new("patch", serde_json::Value::Null);
        assert!(Fragment::from_record(&record).is_err());
    }
}
