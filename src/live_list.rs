//! In-memory list view that mirrors what a platform list does with a batch
//!
//! Every edit is checked against the current rows exactly as a real list view
//! would, so an edit with a stale index panics here instead of corrupting the
//! visual state. Cells are produced by a caller-supplied provider.
use crate::coordinator::ListTarget;
use crate::snapshot::{Identity, Snapshot};
use crate::types::{CommitStatus, Edit, ItemPath, RowAnimation, TransactionId};

/// Builds the visual element for one item. `None` is a contract violation.
pub type CellProvider<I, P, C> = Box<dyn FnMut(ItemPath, &I, &P) -> Option<C>>;

#[derive(Debug, Clone, PartialEq)]
pub struct LiveRow<I, C> {
    pub id: I,
    pub cell: C,
    /// Times the row was asked to re-measure itself.
    pub measured: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveSection<S, I, P, C> {
    pub id: S,
    pub header: P,
    pub rows: Vec<LiveRow<I, C>>,
}

/// Visual transactions as the list saw them, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Transaction {
    Batch {
        txn: TransactionId,
        animation: RowAnimation,
        edits: usize,
    },
    Reload {
        txn: TransactionId,
        sections: usize,
    },
    Relayout {
        paths: Vec<ItemPath>,
        animated: bool,
    },
}

pub struct LiveList<S, I, P, C> {
    sections: Vec<LiveSection<S, I, P, C>>,
    cell_provider: CellProvider<I, P, C>,
    open_batch: Option<(RowAnimation, usize)>,
    history: Vec<Transaction>,
    defer_commits: bool,
    pending: Vec<TransactionId>,
}

impl<S, I, P, C> LiveList<S, I, P, C>
where
    S: Identity,
    I: Identity,
    P: Clone,
{
    pub fn new(cell_provider: CellProvider<I, P, C>) -> Self {
        LiveList {
            sections: Vec::new(),
            cell_provider,
            open_batch: None,
            history: Vec::new(),
            defer_commits: false,
            pending: Vec::new(),
        }
    }

    /// Commits report `Pending` until the host hands the ids from
    /// `take_pending` back to the coordinator.
    pub fn deferring_commits(mut self) -> Self {
        self.defer_commits = true;
        self
    }

    pub fn sections(&self) -> &[LiveSection<S, I, P, C>] {
        &self.sections
    }

    pub fn history(&self) -> &[Transaction] {
        &self.history
    }

    pub fn take_pending(&mut self) -> Vec<TransactionId> {
        std::mem::take(&mut self.pending)
    }

    pub fn row(&self, path: ItemPath) -> Option<&LiveRow<I, C>> {
        self.sections.get(path.section).and_then(|s| s.rows.get(path.item))
    }

    /// Same sections, headers, identities and cells as `snapshot`.
    pub fn is_showing(&self, snapshot: &Snapshot<S, I, P>) -> bool
    where
        P: PartialEq,
        C: PartialEq<P>,
    {
        self.sections.len() == snapshot.section_count()
            && self.sections.iter().enumerate().all(|(section_idx, section)| {
                snapshot.section_id(section_idx) == Some(&section.id)
                    && snapshot.section_payload(section_idx) == Some(&section.header)
                    && snapshot.item_count(section_idx) == Some(section.rows.len())
                    && section.rows.iter().enumerate().all(|(item_idx, row)| {
                        snapshot
                            .item(ItemPath::new(section_idx, item_idx))
                            .is_some_and(|(id, payload)| *id == row.id && row.cell == *payload)
                    })
            })
    }

    fn make_row(&mut self, path: ItemPath, target: &Snapshot<S, I, P>) -> LiveRow<I, C> {
        let Some((id, payload)) = target.item(path) else {
            panic!("LiveList: no item at {} in the target snapshot", path);
        };
        let Some(cell) = (self.cell_provider)(path, id, payload) else {
            panic!(
                "LiveList: cell provider returned no cell for row at {}, item identifier: {:?}",
                path, id
            );
        };
        LiveRow {
            id: id.clone(),
            cell,
            measured: 0,
        }
    }

    fn section_mut(&mut self, index: usize) -> &mut LiveSection<S, I, P, C> {
        let count = self.sections.len();
        self.sections
            .get_mut(index)
            .unwrap_or_else(|| panic!("LiveList: section {} out of bounds ({} sections)", index, count))
    }

    fn take_row(&mut self, path: ItemPath) -> LiveRow<I, C> {
        let section = self.section_mut(path.section);
        assert!(
            path.item < section.rows.len(),
            "LiveList: row {} out of bounds ({} rows)",
            path,
            section.rows.len()
        );
        section.rows.remove(path.item)
    }

    fn put_row(&mut self, path: ItemPath, row: LiveRow<I, C>) {
        let section = self.section_mut(path.section);
        assert!(
            path.item <= section.rows.len(),
            "LiveList: insert at {} past end ({} rows)",
            path,
            section.rows.len()
        );
        section.rows.insert(path.item, row);
    }

    fn build_section(&mut self, index: usize, target: &Snapshot<S, I, P>, with_rows: bool) -> LiveSection<S, I, P, C> {
        let (Some(id), Some(header)) = (target.section_id(index), target.section_payload(index)) else {
            panic!("LiveList: no section at {} in the target snapshot", index);
        };
        let rows = if with_rows {
            (0..target.item_count(index).unwrap_or(0))
                .map(|item| self.make_row(ItemPath::new(index, item), target))
                .collect()
        } else {
            Vec::new()
        };
        LiveSection {
            id: id.clone(),
            header: header.clone(),
            rows,
        }
    }

    fn finish(&mut self, txn: TransactionId) -> CommitStatus {
        if self.defer_commits {
            self.pending.push(txn);
            CommitStatus::Pending
        } else {
            CommitStatus::Finished
        }
    }
}

impl<S, I, P> LiveList<S, I, P, P>
where
    S: Identity + 'static,
    I: Identity + 'static,
    P: Clone + 'static,
{
    /// Cells are plain copies of the item payloads.
    pub fn with_payload_cells() -> Self {
        LiveList::new(Box::new(|_: ItemPath, _: &I, payload: &P| Some(payload.clone())))
    }
}

impl<S, I, P, C> ListTarget<S, I, P> for LiveList<S, I, P, C>
where
    S: Identity,
    I: Identity,
    P: Clone,
{
    fn begin_batch(&mut self, animation: RowAnimation) {
        assert!(self.open_batch.is_none(), "LiveList: nested batch");
        self.open_batch = Some((animation, 0));
    }

    fn apply_edit(&mut self, edit: &Edit, target: &Snapshot<S, I, P>) {
        let Some((_, applied)) = self.open_batch.as_mut() else {
            panic!("LiveList: {} applied outside a batch", edit);
        };
        *applied += 1;
        log::trace!("LiveList: {}", edit);

        match *edit {
            Edit::SectionInsert { index } => {
                assert!(index <= self.sections.len(), "LiveList: section insert at {} past end", index);
                let section = self.build_section(index, target, false);
                self.sections.insert(index, section);
            }
            Edit::SectionDelete { index } => {
                assert!(index < self.sections.len(), "LiveList: section delete at {} out of bounds", index);
                self.sections.remove(index);
            }
            Edit::SectionMove { from, to } => {
                assert!(from < self.sections.len(), "LiveList: section move from {} out of bounds", from);
                let section = self.sections.remove(from);
                assert!(to <= self.sections.len(), "LiveList: section move to {} past end", to);
                self.sections.insert(to, section);
            }
            Edit::SectionUpdate { index } => {
                let header = target.section_payload(index).cloned();
                let section = self.section_mut(index);
                match header {
                    Some(header) => section.header = header,
                    None => panic!("LiveList: no section at {} in the target snapshot", index),
                }
            }
            Edit::ItemInsert { path } => {
                let row = self.make_row(path, target);
                self.put_row(path, row);
            }
            Edit::ItemDelete { path } => {
                self.take_row(path);
            }
            Edit::ItemMove { from, to } => {
                let row = self.take_row(from);
                self.put_row(to, row);
            }
            Edit::ItemUpdate { path } => {
                let row = self.make_row(path, target);
                let section = self.section_mut(path.section);
                match section.rows.get_mut(path.item) {
                    Some(slot) => *slot = row,
                    None => panic!("LiveList: update of missing row {}", path),
                }
            }
        }
    }

    fn commit_batch(&mut self, txn: TransactionId) -> CommitStatus {
        let Some((animation, edits)) = self.open_batch.take() else {
            panic!("LiveList: commit without a batch");
        };
        self.history.push(Transaction::Batch { txn, animation, edits });
        self.finish(txn)
    }

    fn reload(&mut self, snapshot: &Snapshot<S, I, P>, txn: TransactionId) -> CommitStatus {
        assert!(self.open_batch.is_none(), "LiveList: reload inside a batch");
        let sections = (0..snapshot.section_count())
            .map(|index| self.build_section(index, snapshot, true))
            .collect();
        self.sections = sections;
        self.history.push(Transaction::Reload {
            txn,
            sections: snapshot.section_count(),
        });
        self.finish(txn)
    }

    fn relayout(&mut self, paths: &[ItemPath], animated: bool) {
        for path in paths {
            if let Some(row) = self.sections.get_mut(path.section).and_then(|s| s.rows.get_mut(path.item)) {
                row.measured += 1;
            }
        }
        self.history.push(Transaction::Relayout {
            paths: paths.to_vec(),
            animated,
        });
    }
}
