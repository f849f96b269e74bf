//! Staged reconciliation of sectioned lists
//!
//! Two snapshots of a sectioned collection go in; a changeset of section and
//! item edits comes out, split into delete, move, insert and update stages
//! that can be replayed one edit at a time against a live list without ever
//! producing an invalid index. The [`Coordinator`] drives a presentation
//! target through those stages as one visual transaction, with a plain
//! reload for first loads, non-animated updates and staging failures.
//!
//! ```
//! use list_reconciler::{diff, Edit, ItemPath, Section, Snapshot};
//!
//! let old: Snapshot<&str, &str, ()> =
//!     Snapshot::new(vec![Section::with_ids("s1", ["a", "b", "c"])]).unwrap();
//! let new = Snapshot::new(vec![Section::with_ids("s1", ["b", "c", "a"])]).unwrap();
//!
//! let changeset = diff(&old, &new).unwrap();
//! let edits: Vec<_> = changeset.edits().copied().collect();
//! assert_eq!(
//!     edits,
//!     vec![Edit::ItemMove { from: ItemPath::new(0, 0), to: ItemPath::new(0, 2) }]
//! );
//! ```
pub mod converters;
pub mod coordinator;
pub mod diff_engine;
pub mod errors;
pub mod live_list;
pub mod snapshot;
pub mod stager;
pub mod types;

pub use coordinator::{ApplyPath, ApplyReport, Completion, Coordinator, CoordinatorConfig, ListTarget, Reconciliation};
pub use diff_engine::{diff, DiffEngine, RawDiff};
pub use errors::ReconcileError;
pub use live_list::{CellProvider, LiveList, LiveRow, LiveSection, Transaction};
pub use snapshot::{Identity, Item, Props, Section, Snapshot};
pub use stager::stage;
pub use types::{Changeset, CommitStatus, Edit, ItemPath, RowAnimation, Stage, StageKind, TransactionId};
