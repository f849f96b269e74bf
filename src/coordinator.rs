//! Applies changesets to a live list, one visual transaction at a time
use crate::diff_engine::DiffEngine;
use crate::errors::ReconcileError;
use crate::snapshot::{Identity, Section, Snapshot};
use crate::types::{next_transaction_id, Changeset, CommitStatus, Edit, ItemPath, RowAnimation, TransactionId};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Completion callback, fired exactly once per reconciliation.
pub type Completion = Box<dyn FnOnce()>;

/// What the coordinator needs from the presentation layer.
pub trait ListTarget<S, I, P> {
    /// Opens a batch; `RowAnimation::None` suppresses animation.
    fn begin_batch(&mut self, animation: RowAnimation);

    /// Applies one edit to the live structure. Inserts and updates read
    /// their content from `target` at the edit's (final) position.
    fn apply_edit(&mut self, edit: &Edit, target: &Snapshot<S, I, P>);

    /// Closes the batch with exactly one visual commit.
    fn commit_batch(&mut self, txn: TransactionId) -> CommitStatus;

    /// Replaces everything with `snapshot`, animation suppressed.
    fn reload(&mut self, snapshot: &Snapshot<S, I, P>, txn: TransactionId) -> CommitStatus;

    /// Re-measures the items at `paths` and runs a layout pass.
    fn relayout(&mut self, paths: &[ItemPath], animated: bool);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Animation used for animated batches.
    pub default_animation: RowAnimation,
    /// Reload without animation the first time anything is shown.
    pub reload_on_first_load: bool,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            default_animation: RowAnimation::Automatic,
            reload_on_first_load: true,
        }
    }
}

impl CoordinatorConfig {
    pub fn from_json(json: &str) -> Result<Self, ReconcileError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug)]
pub enum ApplyPath {
    /// Nothing changed; completion fired without touching the target.
    Unchanged,
    Staged { stages: usize, edits: usize },
    /// Full reload. `fallback` carries the staging failure that forced it.
    Reloaded { fallback: Option<ReconcileError> },
}

#[derive(Debug)]
#[must_use = "a staging failure is only reported through `path`"]
pub struct ApplyReport {
    pub txn: TransactionId,
    pub path: ApplyPath,
    /// Whether the completion already fired.
    pub finished: bool,
}

#[derive(Debug)]
#[must_use = "a staging failure is only reported through the started report"]
pub enum Reconciliation {
    Started(ApplyReport),
    /// Waiting behind the in-flight transaction; `position` is 0-based.
    Queued { position: usize },
}

struct Pending<S, I, P> {
    snapshot: Snapshot<S, I, P>,
    animated: bool,
    on_complete: Completion,
}

struct InFlight {
    txn: TransactionId,
    on_complete: Option<Completion>,
}

pub struct Coordinator<S, I, P, T> {
    target: T,
    current: Snapshot<S, I, P>,
    config: CoordinatorConfig,
    first_load: bool,
    in_flight: Option<InFlight>,
    queue: VecDeque<Pending<S, I, P>>,
}

impl<S, I, P, T> Coordinator<S, I, P, T>
where
    S: Identity,
    I: Identity,
    P: PartialEq,
    T: ListTarget<S, I, P>,
{
    pub fn new(target: T) -> Self {
        Self::with_config(target, CoordinatorConfig::default())
    }

    pub fn with_config(target: T, config: CoordinatorConfig) -> Self {
        log::debug!("Coordinator: initialized with {:?}", config);
        Coordinator {
            target,
            current: Snapshot::empty(),
            config,
            first_load: true,
            in_flight: None,
            queue: VecDeque::new(),
        }
    }

    pub fn snapshot(&self) -> &Snapshot<S, I, P> {
        &self.current
    }

    pub fn section_count(&self) -> usize {
        self.current.section_count()
    }

    pub fn item_count(&self, section: usize) -> usize {
        self.current.item_count(section).unwrap_or(0)
    }

    pub fn identifier_at(&self, path: ItemPath) -> Option<&I> {
        self.current.identifier_at(path)
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Builds the snapshot first; a `DuplicateIdentity` rejection leaves
    /// everything untouched and `on_complete` unfired.
    pub fn reconcile_sections(
        &mut self,
        sections: Vec<Section<S, I, P>>,
        animated: bool,
        on_complete: impl FnOnce() + 'static,
    ) -> Result<Reconciliation, ReconcileError> {
        let snapshot = Snapshot::new(sections)?;
        Ok(self.reconcile(snapshot, animated, on_complete))
    }

    /// Converges the target to `snapshot`. Requests issued while a
    /// transaction is in flight wait in FIFO order.
    pub fn reconcile(
        &mut self,
        snapshot: Snapshot<S, I, P>,
        animated: bool,
        on_complete: impl FnOnce() + 'static,
    ) -> Reconciliation {
        let pending = Pending {
            snapshot,
            animated,
            on_complete: Box::new(on_complete),
        };

        if let Some(in_flight) = &self.in_flight {
            log::debug!(
                "Coordinator: {} in flight, queueing request behind {} others",
                in_flight.txn,
                self.queue.len()
            );
            self.queue.push_back(pending);
            return Reconciliation::Queued {
                position: self.queue.len() - 1,
            };
        }

        Reconciliation::Started(self.start(pending))
    }

    /// Reported by the presentation layer once a pending commit finished.
    /// Fires the completion and starts queued requests; returns their reports.
    pub fn complete(&mut self, txn: TransactionId) -> Result<Vec<ApplyReport>, ReconcileError> {
        match self.in_flight.take() {
            Some(in_flight) if in_flight.txn == txn => {
                log::debug!("Coordinator: {} finished", txn);
                Self::fire(in_flight.on_complete);
            }
            other => {
                self.in_flight = other;
                log::warn!("Coordinator: completion for unknown transaction {}", txn);
                return Err(ReconcileError::UnknownTransaction(txn));
            }
        }

        let mut reports = Vec::new();
        while self.in_flight.is_none() {
            let Some(pending) = self.queue.pop_front() else {
                break;
            };
            reports.push(self.start(pending));
        }
        Ok(reports)
    }

    /// Re-measures already displayed items without a structural change.
    /// Unknown identities are skipped; returns how many items were refreshed.
    pub fn refresh_visual_state<'i>(&mut self, identities: impl IntoIterator<Item = &'i I>, animated: bool) -> usize
    where
        I: 'i,
    {
        let mut paths: Vec<ItemPath> = identities
            .into_iter()
            .flat_map(|id| self.current.locate(id).iter().copied())
            .collect();
        if paths.is_empty() {
            return 0;
        }
        paths.sort_unstable();
        paths.dedup();

        log::debug!("Coordinator: refreshing {} items (animated: {})", paths.len(), animated);
        self.target.relayout(&paths, animated);
        paths.len()
    }

    fn start(&mut self, pending: Pending<S, I, P>) -> ApplyReport {
        let Pending {
            snapshot,
            animated,
            on_complete,
        } = pending;
        let txn = next_transaction_id();
        let first_load = std::mem::replace(&mut self.first_load, false);

        if first_load && self.config.reload_on_first_load {
            log::debug!("Coordinator: {} first load, reloading {} sections", txn, snapshot.section_count());
            return self.reload(txn, snapshot, on_complete, None);
        }

        let changeset = DiffEngine::new(&self.current, &snapshot).changeset();
        self.dispatch(txn, snapshot, animated, changeset, on_complete)
    }

    fn dispatch(
        &mut self,
        txn: TransactionId,
        snapshot: Snapshot<S, I, P>,
        animated: bool,
        changeset: Result<Changeset, ReconcileError>,
        on_complete: Completion,
    ) -> ApplyReport {
        match changeset {
            Ok(changeset) if changeset.is_empty() => {
                log::debug!("Coordinator: {} no changes", txn);
                self.current = snapshot;
                Self::fire(Some(on_complete));
                ApplyReport {
                    txn,
                    path: ApplyPath::Unchanged,
                    finished: true,
                }
            }
            Ok(_) if !animated => {
                log::debug!("Coordinator: {} animation disabled, reloading", txn);
                self.reload(txn, snapshot, on_complete, None)
            }
            Ok(changeset) => self.apply_staged(txn, snapshot, &changeset, on_complete),
            Err(err) => {
                log::warn!("Coordinator: {} staging failed, falling back to reload: {}", txn, err);
                self.reload(txn, snapshot, on_complete, Some(err))
            }
        }
    }

    fn apply_staged(
        &mut self,
        txn: TransactionId,
        snapshot: Snapshot<S, I, P>,
        changeset: &Changeset,
        on_complete: Completion,
    ) -> ApplyReport {
        let animation = self.config.default_animation;
        log::debug!(
            "Coordinator: {} applying {} stages / {} edits with {:?}",
            txn,
            changeset.stages().len(),
            changeset.edit_count(),
            animation
        );

        self.target.begin_batch(animation);
        for edit in changeset.edits() {
            self.target.apply_edit(edit, &snapshot);
        }
        let status = self.target.commit_batch(txn);
        self.current = snapshot;

        let path = ApplyPath::Staged {
            stages: changeset.stages().len(),
            edits: changeset.edit_count(),
        };
        self.settle(txn, status, on_complete, path)
    }

    fn reload(
        &mut self,
        txn: TransactionId,
        snapshot: Snapshot<S, I, P>,
        on_complete: Completion,
        fallback: Option<ReconcileError>,
    ) -> ApplyReport {
        let status = self.target.reload(&snapshot, txn);
        self.current = snapshot;
        self.settle(txn, status, on_complete, ApplyPath::Reloaded { fallback })
    }

    fn settle(&mut self, txn: TransactionId, status: CommitStatus, on_complete: Completion, path: ApplyPath) -> ApplyReport {
        let finished = match status {
            CommitStatus::Finished => {
                Self::fire(Some(on_complete));
                true
            }
            CommitStatus::Pending => {
                self.in_flight = Some(InFlight {
                    txn,
                    on_complete: Some(on_complete),
                });
                false
            }
        };
        ApplyReport { txn, path, finished }
    }

    fn fire(on_complete: Option<Completion>) {
        if let Some(callback) = on_complete {
            callback();
        }
    }
}
