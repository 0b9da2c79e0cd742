//! Append-only record streams with markers and channels
//!
//! A [`Record`] is an immutable, monotonically sequenced entry with a type
//! tag (`"snapshot"`, `"patch"`, `"fragment"`, `"marker"`, ...) and an
//! arbitrary payload. A [`StreamRegistry`] appends records, assigns each a
//! `seq`, and maintains named **markers** — positions that delimit sections
//! of the stream as half-open ranges `[marker_seq, next_marker_seq)`.
//!
//! **Channels** are a filtering convention: a record belongs to channel `c`
//! when its `record_type` is `c` or its tags contain `channel:c`. A journal
//! is nothing more than the `fragment` channel of a ledger's stream viewed
//! one step-section at a time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::{CoreError, Result};

/// One immutable entry in a stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Stable identity
    pub uid: Uuid,

    /// Position in the owning stream; assigned on append
    pub seq: u64,

    /// Type tag: `"snapshot"`, `"patch"`, `"fragment"`, `"marker"`, ...
    pub record_type: String,

    /// Optional label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Tag set; `channel:NAME` tags add the record to extra channels
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Wall-clock append time; metadata only, never part of any state hash
    pub ts: DateTime<Utc>,

    /// Arbitrary payload
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl Record {
    /// New unsequenced record; the stream assigns `seq` on append
    pub fn new(record_type: impl Into<String>, payload: Value) -> Self {
        Self {
            uid: Uuid::new_v4(),
            seq: 0,
            record_type: record_type.into(),
            label: None,
            tags: BTreeSet::new(),
            ts: Utc::now(),
            payload,
        }
    }

    /// Builder: set the label
    pub fn labeled(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Builder: add a tag
    pub fn tagged(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Builder: add to a channel via a `channel:` tag
    pub fn on_channel(self, channel: &str) -> Self {
        self.tagged(format!("channel:{channel}"))
    }

    /// Channel membership: type tag match or `channel:` tag match
    pub fn has_channel(&self, channel: &str) -> bool {
        self.record_type == channel || self.tags.contains(&format!("channel:{channel}"))
    }
}

impl Entity for Record {
    fn uid(&self) -> Uuid {
        self.uid
    }
    fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }
    fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }
}

/// An append-only sequenced stream of records with named markers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StreamRegistry {
    /// Stable identity of the stream itself
    pub uid: Uuid,

    records: Vec<Record>,

    /// Marker name → seq of the first record at/after the marker
    markers: BTreeMap<String, u64>,

    next_seq: u64,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self {
            uid: Uuid::new_v4(),
            records: Vec::new(),
            markers: BTreeMap::new(),
            next_seq: 0,
        }
    }

    /// Append a record, assigning the next seq. Returns the assigned seq.
    pub fn add_record(&mut self, mut record: Record) -> u64 {
        record.seq = self.next_seq;
        self.next_seq += 1;
        let seq = record.seq;
        self.records.push(record);
        seq
    }

    /// Append several records under a fresh marker.
    ///
    /// Returns the `(first_seq, last_seq)` of the appended block.
    pub fn push_records(
        &mut self,
        records: Vec<Record>,
        marker_name: &str,
    ) -> Result<(u64, u64)> {
        self.set_marker(marker_name)?;
        let start = self.next_seq;
        let mut end = start;
        for record in records {
            end = self.add_record(record);
        }
        Ok((start, end))
    }

    /// Place a named marker at the current head of the stream.
    ///
    /// Duplicate names are rejected — markers are landmarks, not cursors.
    pub fn set_marker(&mut self, name: &str) -> Result<u64> {
        if self.markers.contains_key(name) {
            return Err(CoreError::MarkerExists { name: name.into() });
        }
        self.markers.insert(name.to_string(), self.next_seq);
        Ok(self.next_seq)
    }

    /// Seq a marker points at
    pub fn marker_seq(&self, name: &str) -> Option<u64> {
        self.markers.get(name).copied()
    }

    /// All markers, name → seq
    pub fn markers(&self) -> &BTreeMap<String, u64> {
        &self.markers
    }

    /// The half-open section `[marker, next_marker)`.
    ///
    /// The end bound is the smallest marker seq strictly greater than the
    /// named marker's seq, or the stream head when no later marker exists.
    pub fn get_section<'a>(
        &'a self,
        marker_name: &str,
    ) -> Result<impl Iterator<Item = &'a Record> + 'a> {
        let start = self
            .marker_seq(marker_name)
            .ok_or_else(|| CoreError::MarkerMissing {
                name: marker_name.into(),
            })?;
        let end = self
            .markers
            .values()
            .filter(|seq| **seq > start)
            .min()
            .copied()
            .unwrap_or(self.next_seq);
        Ok(self.get_slice(start, end))
    }

    /// Records in the named section restricted to a channel
    pub fn get_section_channel<'a>(
        &'a self,
        marker_name: &str,
        channel: &'a str,
    ) -> Result<impl Iterator<Item = &'a Record> + 'a> {
        Ok(self
            .get_section(marker_name)?
            .filter(move |r| r.has_channel(channel)))
    }

    /// Records with `start <= seq < end`, in seq order
    pub fn get_slice(&self, start: u64, end: u64) -> impl Iterator<Item = &Record> {
        self.records
            .iter()
            .filter(move |r| r.seq >= start && r.seq < end)
    }

    /// All records of a channel, in seq order
    pub fn iter_channel<'a>(&'a self, channel: &'a str) -> impl Iterator<Item = &'a Record> + 'a {
        self.records.iter().filter(move |r| r.has_channel(channel))
    }

    /// Latest record, optionally restricted to a channel
    pub fn last(&self, channel: Option<&str>) -> Option<&Record> {
        match channel {
            None => self.records.last(),
            Some(ch) => self.records.iter().rev().find(|r| r.has_channel(ch)),
        }
    }

    /// All records in seq order
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Highest assigned seq, if any record exists
    pub fn max_seq(&self) -> Option<u64> {
        self.records.last().map(|r| r.seq)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rec(rtype: &str, label: &str) -> Record {
        Record::new(rtype, Value::Null).labeled(label)
    }

    #[test]
    fn seq_assignment_is_monotonic() {
        let mut rs = StreamRegistry::new();
        rs.add_record(rec("fragment", "a"));
        rs.add_record(rec("fragment", "b"));
        let seqs: Vec<u64> = rs.records().iter().map(|r| r.seq).collect();
        assert_eq!(seqs, vec![0, 1]);
        assert_eq!(rs.max_seq(), Some(1));
    }

    #[test]
    fn channel_membership_by_type_and_tag() {
        let r = Record::new("patch", json!({})).on_channel("journal");
        assert!(r.has_channel("patch"));
        assert!(r.has_channel("journal"));
        assert!(!r.has_channel("audit"));
    }

    #[test]
    fn push_records_sets_marker_and_half_open_bounds() {
        let mut rs = StreamRegistry::new();
        let (start, end) = rs
            .push_records(
                vec![rec("fragment", "A"), rec("patch", "B"), rec("fragment", "C")],
                "e1",
            )
            .unwrap();
        assert_eq!(end - start, 2);
        let labels: Vec<&str> = rs
            .get_section("e1")
            .unwrap()
            .filter_map(|r| r.label())
            .collect();
        assert_eq!(labels, vec!["A", "B", "C"]);
    }

    #[test]
    fn adjacent_sections_do_not_overlap() {
        let mut rs = StreamRegistry::new();
        rs.push_records(vec![rec("fragment", "e1a"), rec("fragment", "e1b")], "e1")
            .unwrap();
        rs.push_records(vec![rec("fragment", "e2a")], "e2").unwrap();

        let s1: Vec<&str> = rs.get_section("e1").unwrap().filter_map(|r| r.label()).collect();
        let s2: Vec<&str> = rs.get_section("e2").unwrap().filter_map(|r| r.label()).collect();
        assert_eq!(s1, vec!["e1a", "e1b"]);
        assert_eq!(s2, vec!["e2a"]);
    }

    #[test]
    fn missing_marker_raises() {
        let rs = StreamRegistry::new();
        assert!(matches!(
            rs.get_section("nope").err(),
            Some(CoreError::MarkerMissing { .. })
        ));
    }

    #[test]
    fn duplicate_marker_raises() {
        let mut rs = StreamRegistry::new();
        rs.set_marker("chapter1").unwrap();
        assert!(matches!(
            rs.set_marker("chapter1"),
            Err(CoreError::MarkerExists { .. })
        ));
    }

    #[test]
    fn slicing_and_channels() {
        let mut rs = StreamRegistry::new();
        rs.add_record(rec("fragment", "a").on_channel("journal"));
        rs.add_record(rec("patch", "b").on_channel("ops"));
        rs.add_record(rec("fragment", "c").on_channel("journal"));

        let mid: Vec<&str> = rs.get_slice(1, 2).filter_map(|r| r.label()).collect();
        assert_eq!(mid, vec!["b"]);

        let journal: Vec<&str> = rs
            .iter_channel("journal")
            .filter_map(|r| r.label())
            .collect();
        assert_eq!(journal, vec!["a", "c"]);

        assert_eq!(rs.last(Some("journal")).unwrap().label(), Some("c"));
        assert_eq!(rs.last(None).unwrap().label(), Some("c"));
    }

    #[test]
    fn empty_stream() {
        let rs = StreamRegistry::new();
        assert_eq!(rs.len(), 0);
        assert!(rs.markers().is_empty());
        assert_eq!(rs.max_seq(), None);
        assert!(rs.last(None).is_none());
    }

    #[test]
    fn stream_round_trips() {
        let mut rs = StreamRegistry::new();
        rs.push_records(vec![rec("fragment", "a")], "m").unwrap();
        let tree = serde_json::to_value(&rs).unwrap();
        let back: StreamRegistry = serde_json::from_value(tree).unwrap();
        assert_eq!(back, rs);
        assert_eq!(back.marker_seq("m"), Some(0));
    }
}
