//! Edit, stage and transaction types shared by the engine and its targets
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Position of one item: section index plus item index inside that section.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ItemPath {
    pub section: usize,
    pub item: usize,
}

impl ItemPath {
    pub fn new(section: usize, item: usize) -> Self {
        ItemPath { section, item }
    }
}

impl fmt::Display for ItemPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.section, self.item)
    }
}

/// One structural edit. Indices are relative to the structure as left by
/// every edit that precedes this one in its changeset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Edit {
    SectionInsert { index: usize },
    SectionDelete { index: usize },
    SectionMove { from: usize, to: usize },
    SectionUpdate { index: usize },
    ItemInsert { path: ItemPath },
    ItemDelete { path: ItemPath },
    ItemMove { from: ItemPath, to: ItemPath },
    ItemUpdate { path: ItemPath },
}

impl Edit {
    pub fn is_section_edit(&self) -> bool {
        matches!(
            self,
            Edit::SectionInsert { .. }
                | Edit::SectionDelete { .. }
                | Edit::SectionMove { .. }
                | Edit::SectionUpdate { .. }
        )
    }

    /// The stage this edit belongs to.
    pub fn stage_kind(&self) -> StageKind {
        match self {
            Edit::SectionDelete { .. } | Edit::ItemDelete { .. } => StageKind::Delete,
            Edit::SectionMove { .. } | Edit::ItemMove { .. } => StageKind::Move,
            Edit::SectionInsert { .. } | Edit::ItemInsert { .. } => StageKind::Insert,
            Edit::SectionUpdate { .. } | Edit::ItemUpdate { .. } => StageKind::Update,
        }
    }
}

impl fmt::Display for Edit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Edit::SectionInsert { index } => write!(f, "SECTION_INSERT {}", index),
            Edit::SectionDelete { index } => write!(f, "SECTION_DELETE {}", index),
            Edit::SectionMove { from, to } => write!(f, "SECTION_MOVE {} -> {}", from, to),
            Edit::SectionUpdate { index } => write!(f, "SECTION_UPDATE {}", index),
            Edit::ItemInsert { path } => write!(f, "ITEM_INSERT {}", path),
            Edit::ItemDelete { path } => write!(f, "ITEM_DELETE {}", path),
            Edit::ItemMove { from, to } => write!(f, "ITEM_MOVE {} -> {}", from, to),
            Edit::ItemUpdate { path } => write!(f, "ITEM_UPDATE {}", path),
        }
    }
}

/// Structural kind of a stage, in canonical application order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Delete,
    Move,
    Insert,
    Update,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StageKind::Delete => "delete",
            StageKind::Move => "move",
            StageKind::Insert => "insert",
            StageKind::Update => "update",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub kind: StageKind,
    pub edits: Vec<Edit>,
}

/// Ordered, stage-partitioned edits turning one snapshot into another.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Changeset {
    stages: Vec<Stage>,
}

impl Changeset {
    /// Append a stage. Empty stages are dropped so that an unchanged
    /// snapshot pair always yields an empty changeset.
    pub(crate) fn push_stage(&mut self, kind: StageKind, edits: Vec<Edit>) {
        if !edits.is_empty() {
            self.stages.push(Stage { kind, edits });
        }
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn edits(&self) -> impl Iterator<Item = &Edit> {
        self.stages.iter().flat_map(|stage| stage.edits.iter())
    }

    pub fn edit_count(&self) -> usize {
        self.stages.iter().map(|stage| stage.edits.len()).sum()
    }

    pub fn count_matching(&self, predicate: impl Fn(&Edit) -> bool) -> usize {
        self.edits().filter(|edit| predicate(edit)).count()
    }
}

/// Animation requested from the presentation layer for a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RowAnimation {
    /// Animation suppressed; used for reloads and the non-animated path.
    None,
    #[default]
    Automatic,
    Fade,
    Top,
    Bottom,
    Left,
    Right,
    Middle,
}

/// Handle the presentation layer uses to report that a visual transaction
/// finished. It never owns the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn_{}", self.0)
    }
}

/// Whether a commit finished synchronously or will be reported later
/// through `Coordinator::complete`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitStatus {
    Finished,
    Pending,
}

/// Global transaction id generator (lock-free, atomic)
static TXN_COUNTER: Lazy<AtomicU64> = Lazy::new(|| AtomicU64::new(1));

pub fn next_transaction_id() -> TransactionId {
    TransactionId(TXN_COUNTER.fetch_add(1, Ordering::SeqCst))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_stages_are_dropped() {
        let mut changeset = Changeset::default();
        changeset.push_stage(StageKind::Delete, Vec::new());
        changeset.push_stage(StageKind::Update, vec![Edit::SectionUpdate { index: 0 }]);
        assert_eq!(changeset.stages().len(), 1);
        assert_eq!(changeset.edit_count(), 1);
        assert_eq!(changeset.count_matching(Edit::is_section_edit), 1);
    }

    #[test]
    fn edits_serialize_with_action_tag() {
        let edit = Edit::ItemMove { from: ItemPath::new(0, 0), to: ItemPath::new(1, 2) };
        let json = serde_json::to_value(edit).unwrap();
        assert_eq!(json["action"], "ITEM_MOVE");
        assert_eq!(json["to"]["item"], 2);
        assert_eq!(edit.to_string(), "ITEM_MOVE [0, 0] -> [1, 2]");
    }

    #[test]
    fn transaction_ids_are_unique() {
        let a = next_transaction_id();
        let b = next_transaction_id();
        assert!(b > a);
    }
}
