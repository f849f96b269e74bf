//! Identity-based diffing of sectioned snapshots
use crate::errors::ReconcileError;
use crate::snapshot::{Identity, Snapshot};
use crate::stager;
use crate::types::{Changeset, ItemPath};
use std::collections::{HashMap, VecDeque};

/// Element-level diff between two snapshots.
///
/// Deletes are expressed in old positions, inserts and updates carry new
/// positions, moves carry both. Turning these into indices that are valid
/// against a structure mutated edit by edit is the stager's job.
#[derive(Debug)]
pub struct RawDiff<'a, S, I, P> {
    pub old: &'a Snapshot<S, I, P>,
    pub new: &'a Snapshot<S, I, P>,
    /// For every new section, the old index of the section with the same identity.
    pub section_sources: Vec<Option<usize>>,
    pub section_deletes: Vec<usize>,
    pub section_inserts: Vec<usize>,
    /// `(old, new)` index pairs of matched sections that change relative order.
    pub section_moves: Vec<(usize, usize)>,
    pub section_updates: Vec<(usize, usize)>,
    /// For every new item, the old path of the item it was matched with.
    pub item_sources: Vec<Vec<Option<ItemPath>>>,
    pub item_deletes: Vec<ItemPath>,
    pub item_inserts: Vec<ItemPath>,
    pub item_moves: Vec<(ItemPath, ItemPath)>,
    pub item_updates: Vec<(ItemPath, ItemPath)>,
}

impl<'a, S, I, P> RawDiff<'a, S, I, P> {
    pub fn is_empty(&self) -> bool {
        self.section_deletes.is_empty()
            && self.section_inserts.is_empty()
            && self.section_moves.is_empty()
            && self.section_updates.is_empty()
            && self.item_deletes.is_empty()
            && self.item_inserts.is_empty()
            && self.item_moves.is_empty()
            && self.item_updates.is_empty()
    }
}

pub struct DiffEngine<'a, S, I, P> {
    old: &'a Snapshot<S, I, P>,
    new: &'a Snapshot<S, I, P>,
}

impl<'a, S: Identity, I: Identity, P: PartialEq> DiffEngine<'a, S, I, P> {
    pub fn new(old: &'a Snapshot<S, I, P>, new: &'a Snapshot<S, I, P>) -> Self {
        DiffEngine { old, new }
    }

    /// Raw diff followed by staging.
    pub fn changeset(&self) -> Result<Changeset, ReconcileError> {
        let raw = self.raw_diff();
        stager::stage(&raw)
    }

    pub fn raw_diff(&self) -> RawDiff<'a, S, I, P> {
        let mut raw = RawDiff {
            old: self.old,
            new: self.new,
            section_sources: Vec::with_capacity(self.new.section_count()),
            section_deletes: Vec::new(),
            section_inserts: Vec::new(),
            section_moves: Vec::new(),
            section_updates: Vec::new(),
            item_sources: Vec::with_capacity(self.new.section_count()),
            item_deletes: Vec::new(),
            item_inserts: Vec::new(),
            item_moves: Vec::new(),
            item_updates: Vec::new(),
        };

        let matched_sections = self.diff_sections(&mut raw);
        self.diff_items(&mut raw, &matched_sections);

        log::debug!(
            "DiffEngine: sections -{} +{} ~{} moved={} | items -{} +{} ~{} moved={}",
            raw.section_deletes.len(),
            raw.section_inserts.len(),
            raw.section_updates.len(),
            raw.section_moves.len(),
            raw.item_deletes.len(),
            raw.item_inserts.len(),
            raw.item_updates.len(),
            raw.item_moves.len(),
        );

        raw
    }

    /// Fills the section half of `raw` and returns the matched `(old, new)`
    /// section pairs in new order.
    fn diff_sections(&self, raw: &mut RawDiff<'a, S, I, P>) -> Vec<(usize, usize)> {
        let mut old_survives = vec![false; self.old.section_count()];
        let mut matched = Vec::new();

        for (new_idx, id) in self.new.section_ids().enumerate() {
            let source = self.old.section_index(id);
            raw.section_sources.push(source);
            match source {
                Some(old_idx) => {
                    old_survives[old_idx] = true;
                    matched.push((old_idx, new_idx));
                }
                None => raw.section_inserts.push(new_idx),
            }
        }

        raw.section_deletes = old_survives
            .iter()
            .enumerate()
            .filter(|(_, survives)| !**survives)
            .map(|(old_idx, _)| old_idx)
            .collect();

        let sequence: Vec<usize> = matched.iter().map(|&(old_idx, _)| old_idx).collect();
        let stationary = stationary_flags(&sequence);
        for (&(old_idx, new_idx), keep) in matched.iter().zip(stationary) {
            if !keep {
                raw.section_moves.push((old_idx, new_idx));
            }
            if self.old.section_payload(old_idx) != self.new.section_payload(new_idx) {
                raw.section_updates.push((old_idx, new_idx));
            }
        }

        matched
    }

    fn diff_items(&self, raw: &mut RawDiff<'a, S, I, P>, matched_sections: &[(usize, usize)]) {
        let mut old_matched: Vec<Vec<bool>> = (0..self.old.section_count())
            .map(|idx| vec![false; self.old.item_count(idx).unwrap_or(0)])
            .collect();
        raw.item_sources = (0..self.new.section_count())
            .map(|idx| vec![None; self.new.item_count(idx).unwrap_or(0)])
            .collect();

        // Same section first: an item that stays in its section never
        // becomes a cross-section move.
        for &(old_idx, new_idx) in matched_sections {
            let Some(old_section_id) = self.old.section_id(old_idx) else {
                continue;
            };
            for (item_idx, item_id) in self.new.item_ids(new_idx).enumerate() {
                if let Some(source) = self.old.item_path(old_section_id, item_id) {
                    raw.item_sources[new_idx][item_idx] = Some(source);
                    old_matched[source.section][source.item] = true;
                }
            }
        }

        // Leftovers of surviving sections pair up across sections, in snapshot order.
        let mut pool: HashMap<&I, VecDeque<ItemPath>> = HashMap::new();
        let mut surviving_old: Vec<usize> = matched_sections.iter().map(|&(old_idx, _)| old_idx).collect();
        surviving_old.sort_unstable();
        for &old_idx in &surviving_old {
            for (item_idx, item_id) in self.old.item_ids(old_idx).enumerate() {
                if !old_matched[old_idx][item_idx] {
                    pool.entry(item_id)
                        .or_default()
                        .push_back(ItemPath::new(old_idx, item_idx));
                }
            }
        }
        if !pool.is_empty() {
            for &(_, new_idx) in matched_sections {
                for (item_idx, item_id) in self.new.item_ids(new_idx).enumerate() {
                    if raw.item_sources[new_idx][item_idx].is_some() {
                        continue;
                    }
                    if let Some(source) = pool.get_mut(item_id).and_then(VecDeque::pop_front) {
                        log::trace!(
                            "DiffEngine: item {:?} crosses sections {} -> {}",
                            item_id,
                            source,
                            ItemPath::new(new_idx, item_idx)
                        );
                        raw.item_sources[new_idx][item_idx] = Some(source);
                        old_matched[source.section][source.item] = true;
                    }
                }
            }
        }

        // Items of deleted sections leave with their section.
        for &old_idx in &surviving_old {
            for (item_idx, matched) in old_matched[old_idx].iter().enumerate() {
                if !matched {
                    raw.item_deletes.push(ItemPath::new(old_idx, item_idx));
                }
            }
        }

        for (new_idx, sources) in raw.item_sources.iter().enumerate() {
            let old_section = raw.section_sources[new_idx];
            let mut sequence = Vec::new();
            let mut sequence_targets = Vec::new();

            for (item_idx, source) in sources.iter().enumerate() {
                let target = ItemPath::new(new_idx, item_idx);
                match source {
                    None => raw.item_inserts.push(target),
                    Some(source) => {
                        if Some(source.section) == old_section {
                            sequence.push(source.item);
                            sequence_targets.push((*source, target));
                        } else {
                            raw.item_moves.push((*source, target));
                        }
                        if self.old.item_payload(*source) != self.new.item_payload(target) {
                            raw.item_updates.push((*source, target));
                        }
                    }
                }
            }

            let stationary = stationary_flags(&sequence);
            for (pair, keep) in sequence_targets.into_iter().zip(stationary) {
                if !keep {
                    raw.item_moves.push(pair);
                }
            }
        }

        // Keep moves in target order regardless of how they were found.
        raw.item_moves.sort_by_key(|&(_, target)| target);
    }
}

/// Convenience entry point: staged changeset turning `old` into `new`.
pub fn diff<S: Identity, I: Identity, P: PartialEq>(
    old: &Snapshot<S, I, P>,
    new: &Snapshot<S, I, P>,
) -> Result<Changeset, ReconcileError> {
    DiffEngine::new(old, new).changeset()
}

/// Marks the members of the lexicographically smallest longest increasing
/// subsequence of `seq` (values must be distinct). O(n log n).
///
/// Among all maximal sets of elements that can stay in place, this keeps the
/// one starting with the smallest old indices, i.e. the longest possible run
/// from the front of the old order stays still.
fn stationary_flags(seq: &[usize]) -> Vec<bool> {
    let mut flags = vec![false; seq.len()];
    if seq.is_empty() {
        return flags;
    }

    // starts[i]: length of the longest increasing subsequence beginning at i.
    // tails[k]: largest first value among increasing runs of length k + 1
    // seen so far (scanning right to left); strictly decreasing in k.
    let mut starts = vec![0usize; seq.len()];
    let mut tails: Vec<usize> = Vec::new();
    for i in (0..seq.len()).rev() {
        let value = seq[i];
        let k = tails.partition_point(|&t| t > value);
        if k == tails.len() {
            tails.push(value);
        } else {
            tails[k] = value;
        }
        starts[i] = k + 1;
    }

    let total = tails.len();
    let mut levels: Vec<Vec<usize>> = vec![Vec::new(); total + 1];
    for (i, &len) in starts.iter().enumerate() {
        levels[len].push(i);
    }

    // Within one level values strictly decrease with position, so the
    // candidates above `last` form a prefix and its end holds the smallest.
    let mut last: Option<usize> = None;
    for level in levels[1..].iter().rev() {
        let end = level.partition_point(|&i| last.is_none_or(|l| seq[i] > l));
        if end == 0 {
            break;
        }
        let pick = level[end - 1];
        flags[pick] = true;
        last = Some(seq[pick]);
    }

    flags
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Section;
    use pretty_assertions::assert_eq;

    type Snap = Snapshot<&'static str, &'static str, u32>;

    fn snap(sections: &[(&'static str, &[&'static str])]) -> Snap {
        Snapshot::new(
            sections
                .iter()
                .map(|(id, items)| Section::with_ids(*id, items.iter().copied()))
                .collect(),
        )
        .unwrap()
    }

    fn kept(seq: &[usize]) -> Vec<usize> {
        seq.iter()
            .zip(stationary_flags(seq))
            .filter(|(_, keep)| *keep)
            .map(|(v, _)| *v)
            .collect()
    }

    #[test]
    fn lis_prefers_smallest_old_indices() {
        assert_eq!(kept(&[]), Vec::<usize>::new());
        assert_eq!(kept(&[0, 1, 2]), vec![0, 1, 2]);
        assert_eq!(kept(&[1, 2, 0]), vec![1, 2]);
        assert_eq!(kept(&[1, 0]), vec![0]);
        assert_eq!(kept(&[2, 3, 0, 1]), vec![0, 1]);
        assert_eq!(kept(&[3, 2, 1, 0]), vec![0]);
        assert_eq!(kept(&[4, 0, 5, 1, 2, 6, 3]), vec![0, 1, 2, 3]);
    }

    #[test]
    fn lis_has_maximal_length() {
        let seq = [5, 1, 6, 2, 7, 3, 8, 0, 9];
        let picked = kept(&seq);
        assert_eq!(picked.len(), 5);
        assert!(picked.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn raw_diff_positions_use_their_own_frames() {
        let old = snap(&[("s1", &["a", "b", "c"]), ("s2", &["d"])]);
        let new = snap(&[("s2", &["d", "e"]), ("s1", &["c", "a"])]);
        let raw = DiffEngine::new(&old, &new).raw_diff();

        assert_eq!(raw.section_sources, vec![Some(1), Some(0)]);
        assert_eq!(raw.section_moves, vec![(1, 0)]);
        assert_eq!(raw.item_deletes, vec![ItemPath::new(0, 1)]);
        assert_eq!(raw.item_inserts, vec![ItemPath::new(0, 1)]);
        assert_eq!(raw.item_moves, vec![(ItemPath::new(0, 2), ItemPath::new(1, 0))]);
        assert!(raw.item_updates.is_empty());
    }

    #[test]
    fn items_cross_between_surviving_sections() {
        let old = snap(&[("s1", &["a", "b"]), ("s2", &["c"])]);
        let new = snap(&[("s1", &["a"]), ("s2", &["b", "c"])]);
        let raw = DiffEngine::new(&old, &new).raw_diff();

        assert_eq!(raw.item_moves, vec![(ItemPath::new(0, 1), ItemPath::new(1, 0))]);
        assert!(raw.item_deletes.is_empty());
        assert!(raw.item_inserts.is_empty());
    }

    #[test]
    fn items_of_deleted_sections_are_not_carried_over() {
        let old = snap(&[("s1", &["a"]), ("s2", &["b"])]);
        let new = snap(&[("s2", &["b", "a"])]);
        let raw = DiffEngine::new(&old, &new).raw_diff();

        assert_eq!(raw.section_deletes, vec![0]);
        assert!(raw.item_deletes.is_empty());
        assert_eq!(raw.item_inserts, vec![ItemPath::new(0, 1)]);
        assert!(raw.item_moves.is_empty());
    }

    #[test]
    fn payload_changes_are_updates_alongside_moves() {
        let old = Snapshot::new(vec![Section::new(
            "s1",
            0u32,
            vec![crate::snapshot::Item::new("a", 1u32), crate::snapshot::Item::new("b", 1)],
        )])
        .unwrap();
        let new = Snapshot::new(vec![Section::new(
            "s1",
            7u32,
            vec![crate::snapshot::Item::new("b", 1u32), crate::snapshot::Item::new("a", 2)],
        )])
        .unwrap();
        let raw = DiffEngine::new(&old, &new).raw_diff();

        assert_eq!(raw.section_updates, vec![(0, 0)]);
        assert_eq!(raw.item_moves, vec![(ItemPath::new(0, 1), ItemPath::new(0, 0))]);
        assert_eq!(raw.item_updates, vec![(ItemPath::new(0, 0), ItemPath::new(0, 1))]);
    }

    #[test]
    fn identical_snapshots_have_an_empty_raw_diff() {
        let old = snap(&[("s1", &["a", "b"]), ("s2", &[])]);
        let new = snap(&[("s1", &["a", "b"]), ("s2", &[])]);
        assert!(DiffEngine::new(&old, &new).raw_diff().is_empty());
    }
}
