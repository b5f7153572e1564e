//! Working set: the per-execution arena of in-flight candidate results
//!
//! Stages exchange results as `WorkingSetID`s. A member is in one of three
//! data states: an index entry reference (`LocAndIdx`), a storage-backed
//! document view (`LocAndUnownedObj`), or a materialized document
//! (`OwnedObj`). Computed metadata such as a text score rides along.
//!
//! # Invariants
//!
//! - IDs are never reused within a working set
//! - Dereferencing a freed ID is an error, never stale data
//! - A flagged member owns its document and must be unflagged before it is freed

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use serde_json::Value;

use crate::document::{approx_document_size, get_dotted, Document, IndexKey, KeyPattern, KeyValue};
use crate::storage::{RecordId, SnapshotView};

use super::errors::{ExecError, ExecResult};

/// Opaque handle to a working set member
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkingSetID(u64);

impl WorkingSetID {
    /// Raw numeric value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for WorkingSetID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wsid:{}", self.0)
    }
}

/// An index key together with the pattern describing it.
///
/// The pattern is shared with the index it came from.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexKeyDatum {
    /// Pattern of the index the key was read from
    pub key_pattern: Arc<KeyPattern>,
    /// Key values
    pub key_data: IndexKey,
}

impl IndexKeyDatum {
    /// Creates a key datum
    pub fn new(key_pattern: Arc<KeyPattern>, key_data: IndexKey) -> Self {
        Self {
            key_pattern,
            key_data,
        }
    }

    /// Value of `path` in this key, if the pattern covers it
    pub fn get_field(&self, path: &str) -> Option<&KeyValue> {
        self.key_pattern
            .position(path)
            .and_then(|i| self.key_data.get(i))
    }
}

/// Data state of a member
#[derive(Debug, Clone, Default)]
pub enum MemberState {
    /// No data (freshly allocated)
    #[default]
    Invalid,
    /// Index entry: record location plus the key(s) it was found under
    LocAndIdx {
        loc: RecordId,
        key_data: Vec<IndexKeyDatum>,
    },
    /// Record location plus a storage-owned view, valid until the next yield
    LocAndUnownedObj { loc: RecordId, obj: SnapshotView },
    /// Materialized document; the location is dropped once it is untrustworthy
    OwnedObj { loc: Option<RecordId>, obj: Document },
}

/// Kinds of computed metadata
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputedDataKind {
    /// Text relevance score
    TextScore,
    /// Geo distance
    GeoDistance,
    /// Index key metadata
    IndexKey,
}

/// Metadata computed by a stage and attached to a member
#[derive(Debug, Clone, PartialEq)]
pub enum ComputedData {
    /// Text relevance score
    TextScore(f64),
    /// Distance from a geo query point
    GeoDistance(f64),
    /// The index key the member was produced from, as a document
    IndexKey(Value),
}

impl ComputedData {
    /// Kind of this metadata
    pub fn kind(&self) -> ComputedDataKind {
        match self {
            ComputedData::TextScore(_) => ComputedDataKind::TextScore,
            ComputedData::GeoDistance(_) => ComputedDataKind::GeoDistance,
            ComputedData::IndexKey(_) => ComputedDataKind::IndexKey,
        }
    }
}

/// A single candidate result
#[derive(Debug, Clone, Default)]
pub struct WorkingSetMember {
    state: MemberState,
    computed: HashMap<ComputedDataKind, ComputedData>,
}

impl WorkingSetMember {
    /// Current data state
    pub fn state(&self) -> &MemberState {
        &self.state
    }

    /// Short name of the data state
    pub fn state_name(&self) -> &'static str {
        match self.state {
            MemberState::Invalid => "INVALID",
            MemberState::LocAndIdx { .. } => "LOC_AND_IDX",
            MemberState::LocAndUnownedObj { .. } => "LOC_AND_UNOWNED_OBJ",
            MemberState::OwnedObj { .. } => "OWNED_OBJ",
        }
    }

    /// Sets the index entry state
    pub fn set_loc_and_idx(&mut self, loc: RecordId, key_data: Vec<IndexKeyDatum>) {
        self.state = MemberState::LocAndIdx { loc, key_data };
    }

    /// Sets the storage-backed document state
    pub fn set_unowned_obj(&mut self, loc: RecordId, obj: SnapshotView) {
        self.state = MemberState::LocAndUnownedObj { loc, obj };
    }

    /// Sets the materialized document state
    pub fn set_owned_obj(&mut self, loc: Option<RecordId>, obj: Document) {
        self.state = MemberState::OwnedObj { loc, obj };
    }

    /// Record location, if the member still has a trustworthy one
    pub fn loc(&self) -> Option<RecordId> {
        match &self.state {
            MemberState::Invalid => None,
            MemberState::LocAndIdx { loc, .. } => Some(*loc),
            MemberState::LocAndUnownedObj { loc, .. } => Some(*loc),
            MemberState::OwnedObj { loc, .. } => *loc,
        }
    }

    /// Returns true if the member has a location
    pub fn has_loc(&self) -> bool {
        self.loc().is_some()
    }

    /// The member's document, owned or not
    pub fn obj(&self) -> Option<&Document> {
        match &self.state {
            MemberState::LocAndUnownedObj { obj, .. } => Some(obj.document()),
            MemberState::OwnedObj { obj, .. } => Some(obj),
            _ => None,
        }
    }

    /// Returns true if the member has a document
    pub fn has_obj(&self) -> bool {
        self.obj().is_some()
    }

    /// Returns true if the member owns its document
    pub fn has_owned_obj(&self) -> bool {
        matches!(self.state, MemberState::OwnedObj { .. })
    }

    /// Returns true if the member's document is a storage view
    pub fn has_unowned_obj(&self) -> bool {
        matches!(self.state, MemberState::LocAndUnownedObj { .. })
    }

    /// Index keys of a `LocAndIdx` member
    pub fn key_data(&self) -> &[IndexKeyDatum] {
        match &self.state {
            MemberState::LocAndIdx { key_data, .. } => key_data,
            _ => &[],
        }
    }

    /// Copies a storage-backed document into the member, keeping the location.
    pub fn make_owned(&mut self) {
        if let MemberState::LocAndUnownedObj { loc, obj } = &self.state {
            self.state = MemberState::OwnedObj {
                loc: Some(*loc),
                obj: obj.to_owned_document(),
            };
        }
    }

    /// Materializes the document and forgets the location.
    ///
    /// Used when the location is about to become invalid. A member holding
    /// only index data cannot be materialized here.
    pub fn fetch_and_invalidate(&mut self) -> ExecResult<()> {
        let state = std::mem::take(&mut self.state);
        self.state = match state {
            MemberState::LocAndUnownedObj { obj, .. } => MemberState::OwnedObj {
                loc: None,
                obj: obj.to_owned_document(),
            },
            MemberState::OwnedObj { obj, .. } => MemberState::OwnedObj { loc: None, obj },
            other => {
                let name = match other {
                    MemberState::Invalid => "INVALID",
                    _ => "LOC_AND_IDX",
                };
                self.state = other;
                return Err(ExecError::invariant(format!(
                    "cannot fetch and invalidate a {} member",
                    name
                )));
            }
        };
        Ok(())
    }

    /// Resets the member to the invalid state and drops its metadata
    pub fn clear(&mut self) {
        self.state = MemberState::Invalid;
        self.computed.clear();
    }

    /// Attaches computed metadata, replacing any of the same kind
    pub fn add_computed(&mut self, data: ComputedData) {
        self.computed.insert(data.kind(), data);
    }

    /// Computed metadata of `kind`
    pub fn get_computed(&self, kind: ComputedDataKind) -> Option<&ComputedData> {
        self.computed.get(&kind)
    }

    /// Returns true if metadata of `kind` is attached
    pub fn has_computed(&self, kind: ComputedDataKind) -> bool {
        self.computed.contains_key(&kind)
    }

    /// Text score, if one was computed
    pub fn text_score(&self) -> Option<f64> {
        match self.computed.get(&ComputedDataKind::TextScore) {
            Some(ComputedData::TextScore(score)) => Some(*score),
            _ => None,
        }
    }

    /// Reads a dotted field from the document, or from the index keys when
    /// the member has no document.
    pub fn get_field_dotted(&self, path: &str) -> Option<Value> {
        if let Some(obj) = self.obj() {
            return get_dotted(obj, path).cloned();
        }
        self.key_data()
            .iter()
            .find_map(|datum| datum.get_field(path))
            .map(KeyValue::to_json)
    }

    /// Approximate memory held by the member.
    pub fn mem_usage(&self) -> usize {
        let mut usage = std::mem::size_of::<RecordId>();
        if let Some(obj) = self.obj() {
            usage += approx_document_size(obj);
        }
        usage += self
            .key_data()
            .iter()
            .map(|d| d.key_data.approx_size())
            .sum::<usize>();
        usage
    }
}

/// Arena of members addressed by `WorkingSetID`.
///
/// Not thread-safe: one stage tree drives one working set.
#[derive(Debug, Default)]
pub struct WorkingSet {
    members: HashMap<WorkingSetID, WorkingSetMember>,
    flagged: HashSet<WorkingSetID>,
    next_id: u64,
}

impl WorkingSet {
    /// Creates an empty working set
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a fresh, empty member
    pub fn allocate(&mut self) -> WorkingSetID {
        let id = WorkingSetID(self.next_id);
        self.next_id += 1;
        self.members.insert(id, WorkingSetMember::default());
        id
    }

    /// Dereferences `id`
    pub fn get(&self, id: WorkingSetID) -> ExecResult<&WorkingSetMember> {
        self.members
            .get(&id)
            .ok_or_else(|| ExecError::invariant(format!("{} is not allocated", id)))
    }

    /// Dereferences `id` mutably
    pub fn get_mut(&mut self, id: WorkingSetID) -> ExecResult<&mut WorkingSetMember> {
        self.members
            .get_mut(&id)
            .ok_or_else(|| ExecError::invariant(format!("{} is not allocated", id)))
    }

    /// Returns true if `id` refers to a live member
    pub fn contains(&self, id: WorkingSetID) -> bool {
        self.members.contains_key(&id)
    }

    /// Releases the member.
    ///
    /// Fails if the ID is unknown or still flagged.
    pub fn free(&mut self, id: WorkingSetID) -> ExecResult<()> {
        if self.flagged.contains(&id) {
            return Err(ExecError::invariant(format!(
                "{} is flagged for review and must be unflagged before it is freed",
                id
            )));
        }
        self.members
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| ExecError::invariant(format!("{} freed twice or never allocated", id)))
    }

    /// Marks a member for re-validation before it may be returned.
    ///
    /// The member must already own its document.
    pub fn flag_for_review(&mut self, id: WorkingSetID) -> ExecResult<()> {
        let member = self.get(id)?;
        if !member.has_owned_obj() {
            return Err(ExecError::invariant(format!(
                "{} flagged in state {}",
                id,
                member.state_name()
            )));
        }
        self.flagged.insert(id);
        Ok(())
    }

    /// Clears the flag, returning whether it was set
    pub fn unflag(&mut self, id: WorkingSetID) -> bool {
        self.flagged.remove(&id)
    }

    /// Returns true if `id` is flagged
    pub fn is_flagged(&self, id: WorkingSetID) -> bool {
        self.flagged.contains(&id)
    }

    /// All flagged IDs
    pub fn flagged(&self) -> &HashSet<WorkingSetID> {
        &self.flagged
    }

    /// Number of live members
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Returns true if no member is live
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Copies every storage-backed document into its member.
    ///
    /// Called before the storage snapshot is released.
    pub fn prepare_for_yield(&mut self) -> usize {
        let mut converted = 0;
        for member in self.members.values_mut() {
            if member.has_unowned_obj() {
                member.make_owned();
                converted += 1;
            }
        }
        converted
    }
}
