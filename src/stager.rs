//! Splits a raw diff into stages that are safe to replay edit by edit
//!
//! The stager walks a shadow copy of the list while it emits edits, so every
//! index it hands out is checked against the structure as it will look at
//! that moment. Any mismatch aborts with `InconsistentDiff` and nothing is
//! returned.
use crate::diff_engine::RawDiff;
use crate::errors::ReconcileError;
use crate::inconsistent;
use crate::snapshot::Identity;
use crate::types::{Changeset, Edit, ItemPath, StageKind};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum SectionKey {
    Old(usize),
    New(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum ItemKey {
    Old(ItemPath),
    New(ItemPath),
}

#[derive(Debug)]
struct ShadowSection {
    key: SectionKey,
    items: Vec<ItemKey>,
}

struct Shadow {
    sections: Vec<ShadowSection>,
}

/// Occupancy counts over a fixed row of slots.
struct Fenwick {
    tree: Vec<usize>,
}

impl Fenwick {
    fn new(len: usize) -> Self {
        Fenwick { tree: vec![0; len + 1] }
    }

    fn occupy(&mut self, slot: usize) {
        let mut i = slot + 1;
        while i < self.tree.len() {
            self.tree[i] += 1;
            i += i & i.wrapping_neg();
        }
    }

    /// Only called on occupied slots.
    fn vacate(&mut self, slot: usize) {
        let mut i = slot + 1;
        while i < self.tree.len() {
            self.tree[i] -= 1;
            i += i & i.wrapping_neg();
        }
    }

    /// Number of occupied slots left of `slot`.
    fn before(&self, slot: usize) -> usize {
        let mut i = slot;
        let mut count = 0;
        while i > 0 {
            count += self.tree[i];
            i &= i - 1;
        }
        count
    }
}

/// One list under moves. Every element it holds during the move stage owns
/// a slot fixed up front: residents keep their current order and each
/// arrival sits in the gap behind its anchor, in landing order. Leaving
/// marks a slot vacant instead of shifting, so a position is the count of
/// occupied slots in front of it.
struct Lane<K> {
    slots: Vec<K>,
    occupied: Vec<bool>,
    counts: Fenwick,
    homes: HashMap<K, usize>,
    landings: HashMap<K, usize>,
}

impl<K: Copy + Eq + Hash + Debug> Lane<K> {
    /// `arrivals` holds `(anchor, key)` in landing order. The anchor is the
    /// resident the key ends up behind, `None` for the front.
    fn new(residents: &[K], arrivals: Vec<(Option<K>, K)>) -> Result<Self, ReconcileError> {
        let kind = StageKind::Move;
        let rank: HashMap<K, usize> = residents.iter().enumerate().map(|(pos, key)| (*key, pos)).collect();

        // Resident at position p sorts as 2p + 1, the gap behind it as 2p + 2.
        let mut entries: Vec<(usize, usize, K, bool)> = Vec::with_capacity(residents.len() + arrivals.len());
        entries.extend(residents.iter().enumerate().map(|(pos, key)| (2 * pos + 1, 0, *key, true)));
        for (order, (anchor, key)) in arrivals.into_iter().enumerate() {
            let gap = match anchor {
                Some(anchor) => {
                    let pos = rank
                        .get(&anchor)
                        .ok_or_else(|| inconsistent!(kind, "anchor {:?} of {:?} is not in the list", anchor, key))?;
                    2 * pos + 2
                }
                None => 0,
            };
            entries.push((gap, order, key, false));
        }
        entries.sort_unstable_by_key(|&(gap, order, _, _)| (gap, order));

        let mut lane = Lane {
            slots: Vec::with_capacity(entries.len()),
            occupied: vec![false; entries.len()],
            counts: Fenwick::new(entries.len()),
            homes: HashMap::with_capacity(residents.len()),
            landings: HashMap::new(),
        };
        for (slot, (_, _, key, resident)) in entries.into_iter().enumerate() {
            lane.slots.push(key);
            if resident {
                lane.homes.insert(key, slot);
                lane.occupied[slot] = true;
                lane.counts.occupy(slot);
            } else if lane.landings.insert(key, slot).is_some() {
                return Err(inconsistent!(kind, "{:?} arrives twice", key));
            }
        }
        Ok(lane)
    }

    /// Pulls a resident out; returns the position it left.
    fn take(&mut self, key: K) -> Result<usize, ReconcileError> {
        let slot = self
            .homes
            .get(&key)
            .copied()
            .filter(|&slot| self.occupied[slot])
            .ok_or_else(|| inconsistent!(StageKind::Move, "{:?} is not in the list", key))?;
        self.occupied[slot] = false;
        self.counts.vacate(slot);
        Ok(self.counts.before(slot))
    }

    /// Drops an arrival into its gap; returns the position it took.
    fn land(&mut self, key: K) -> Result<usize, ReconcileError> {
        let slot = self
            .landings
            .get(&key)
            .copied()
            .filter(|&slot| !self.occupied[slot])
            .ok_or_else(|| inconsistent!(StageKind::Move, "{:?} has no free slot", key))?;
        self.occupied[slot] = true;
        self.counts.occupy(slot);
        Ok(self.counts.before(slot))
    }

    fn into_order(self) -> Vec<K> {
        self.slots
            .into_iter()
            .zip(self.occupied)
            .filter_map(|(key, occupied)| occupied.then_some(key))
            .collect()
    }
}

/// Pairs every moved key with the last stationary key before it.
fn anchored<K: Copy>(new_order: impl IntoIterator<Item = (K, bool)>) -> Vec<(Option<K>, K)> {
    let mut anchor = None;
    let mut arrivals = Vec::new();
    for (key, moved) in new_order {
        if moved {
            arrivals.push((anchor, key));
        } else {
            anchor = Some(key);
        }
    }
    arrivals
}

/// Same result as inserting at each index in turn, lowest first, built in
/// one pass. Fails with `(index, len)` for an index past the end or repeated.
fn splice_ascending<T>(base: Vec<T>, at: &[usize], mut fresh: impl FnMut(usize) -> T) -> Result<Vec<T>, (usize, usize)> {
    let mut previous = None;
    for (inserted, &index) in at.iter().enumerate() {
        let len = base.len() + inserted;
        if index > len || previous == Some(index) {
            return Err((index, len));
        }
        previous = Some(index);
    }

    let total = base.len() + at.len();
    let mut merged = Vec::with_capacity(total);
    let mut at = at.iter().copied().peekable();
    let mut base = base.into_iter();
    for position in 0..total {
        if at.next_if_eq(&position).is_some() {
            merged.push(fresh(position));
        } else {
            merged.extend(base.next());
        }
    }
    Ok(merged)
}

pub fn stage<S: Identity, I: Identity, P>(raw: &RawDiff<'_, S, I, P>) -> Result<Changeset, ReconcileError> {
    let mut shadow = Shadow {
        sections: (0..raw.old.section_count())
            .map(|section| ShadowSection {
                key: SectionKey::Old(section),
                items: (0..raw.old.item_count(section).unwrap_or(0))
                    .map(|item| ItemKey::Old(ItemPath::new(section, item)))
                    .collect(),
            })
            .collect(),
    };

    let mut changeset = Changeset::default();
    changeset.push_stage(StageKind::Delete, stage_deletes(raw, &mut shadow)?);
    changeset.push_stage(StageKind::Move, stage_moves(raw, &mut shadow)?);
    changeset.push_stage(StageKind::Insert, stage_inserts(raw, &mut shadow)?);
    verify_converged(raw, &shadow)?;
    changeset.push_stage(StageKind::Update, stage_updates(raw, &shadow)?);

    for stage in changeset.stages() {
        log::debug!("Stager: {} stage with {} edits", stage.kind, stage.edits.len());
        for edit in &stage.edits {
            log::trace!("Stager:   {}", edit);
        }
    }

    Ok(changeset)
}

/// Item deletes then section deletes, highest index first, so every index
/// still equals its old position when its edit runs.
fn stage_deletes<S, I, P>(raw: &RawDiff<'_, S, I, P>, shadow: &mut Shadow) -> Result<Vec<Edit>, ReconcileError> {
    let kind = StageKind::Delete;
    let mut edits = Vec::with_capacity(raw.item_deletes.len() + raw.section_deletes.len());

    let mut item_deletes = raw.item_deletes.clone();
    item_deletes.sort_unstable_by(|a, b| b.cmp(a));
    item_deletes.dedup();
    for path in &item_deletes {
        let key = shadow
            .sections
            .get(path.section)
            .and_then(|section| section.items.get(path.item));
        if key != Some(&ItemKey::Old(*path)) {
            return Err(inconsistent!(kind, "no item at {} to delete", path));
        }
        edits.push(Edit::ItemDelete { path: *path });
    }
    // Validated above against untouched indices; drop them in one pass.
    let doomed: HashSet<ItemPath> = item_deletes.iter().copied().collect();
    for section in &mut shadow.sections {
        section.items.retain(|item| match item {
            ItemKey::Old(path) => !doomed.contains(path),
            ItemKey::New(_) => true,
        });
    }

    let mut section_deletes = raw.section_deletes.clone();
    section_deletes.sort_unstable_by(|a, b| b.cmp(a));
    section_deletes.dedup();
    for &index in &section_deletes {
        let key = shadow.sections.get(index).map(|section| section.key);
        if key != Some(SectionKey::Old(index)) {
            return Err(inconsistent!(kind, "no section at {} to delete", index));
        }
        edits.push(Edit::SectionDelete { index });
    }
    let doomed: HashSet<usize> = section_deletes.into_iter().collect();
    shadow.sections.retain(|section| match section.key {
        SectionKey::Old(index) => !doomed.contains(&index),
        SectionKey::New(_) => true,
    });

    Ok(edits)
}

/// Each moved element is pulled out and dropped right after its predecessor
/// in the new order. Predecessors are either stationary or already moved,
/// so the settled elements always keep their final relative order.
fn stage_moves<S, I, P>(raw: &RawDiff<'_, S, I, P>, shadow: &mut Shadow) -> Result<Vec<Edit>, ReconcileError> {
    let kind = StageKind::Move;
    let mut edits = Vec::with_capacity(raw.section_moves.len() + raw.item_moves.len());

    if !raw.section_moves.is_empty() {
        let moved_sections: HashSet<usize> = raw.section_moves.iter().map(|&(old, _)| old).collect();
        let residents: Vec<SectionKey> = shadow.sections.iter().map(|section| section.key).collect();
        let arrivals = anchored(
            raw.section_sources
                .iter()
                .flatten()
                .map(|&old| (SectionKey::Old(old), moved_sections.contains(&old))),
        );
        let schedule: Vec<SectionKey> = arrivals.iter().map(|&(_, key)| key).collect();

        let mut lane = Lane::new(&residents, arrivals)?;
        for key in schedule {
            let from = lane.take(key)?;
            let to = lane.land(key)?;
            edits.push(Edit::SectionMove { from, to });
        }

        let mut by_key: HashMap<SectionKey, ShadowSection> =
            shadow.sections.drain(..).map(|section| (section.key, section)).collect();
        shadow.sections = lane
            .into_order()
            .into_iter()
            .map(|key| {
                by_key
                    .remove(&key)
                    .ok_or_else(|| inconsistent!(kind, "section {:?} lost while moving", key))
            })
            .collect::<Result<_, _>>()?;
    }

    if raw.item_moves.is_empty() {
        return Ok(edits);
    }

    // Surviving sections now sit in new order; map old identity to position once.
    let positions: HashMap<usize, usize> = shadow
        .sections
        .iter()
        .enumerate()
        .filter_map(|(position, section)| match section.key {
            SectionKey::Old(old) => Some((old, position)),
            SectionKey::New(_) => None,
        })
        .collect();
    let moved_items: HashSet<ItemPath> = raw.item_moves.iter().map(|&(old, _)| old).collect();

    let mut arrivals: Vec<Vec<(Option<ItemKey>, ItemKey)>> = vec![Vec::new(); shadow.sections.len()];
    let mut schedule = Vec::with_capacity(raw.item_moves.len());
    for (new_section, sources) in raw.item_sources.iter().enumerate() {
        let Some(old_section) = raw.section_sources.get(new_section).copied().flatten() else {
            continue;
        };
        let to_section = *positions
            .get(&old_section)
            .ok_or_else(|| inconsistent!(kind, "section {} vanished before item moves", old_section))?;

        let moved_here: Vec<ItemPath> = sources
            .iter()
            .flatten()
            .copied()
            .filter(|source| moved_items.contains(source))
            .collect();
        if moved_here.is_empty() {
            continue;
        }
        schedule.extend(moved_here.into_iter().map(|source| (source, to_section)));
        arrivals[to_section] = anchored(
            sources
                .iter()
                .flatten()
                .map(|source| (ItemKey::Old(*source), moved_items.contains(source))),
        );
    }

    let mut lanes = shadow
        .sections
        .iter()
        .zip(arrivals)
        .map(|(section, arriving)| Lane::new(&section.items, arriving))
        .collect::<Result<Vec<_>, _>>()?;

    for (source, to_section) in schedule {
        let key = ItemKey::Old(source);
        let from_section = *positions
            .get(&source.section)
            .ok_or_else(|| inconsistent!(kind, "source section of {} was deleted", source))?;
        let from_item = lanes[from_section].take(key)?;
        let to_item = lanes[to_section].land(key)?;
        edits.push(Edit::ItemMove {
            from: ItemPath::new(from_section, from_item),
            to: ItemPath::new(to_section, to_item),
        });
    }

    for (section, lane) in shadow.sections.iter_mut().zip(lanes) {
        section.items = lane.into_order();
    }

    Ok(edits)
}

/// Section inserts then item inserts, lowest new index first: when an edit
/// runs, everything that precedes it in the new snapshot is already there.
fn stage_inserts<S, I, P>(raw: &RawDiff<'_, S, I, P>, shadow: &mut Shadow) -> Result<Vec<Edit>, ReconcileError> {
    let kind = StageKind::Insert;
    let mut edits = Vec::with_capacity(raw.section_inserts.len() + raw.item_inserts.len());

    let mut section_inserts = raw.section_inserts.clone();
    section_inserts.sort_unstable();
    let sections = std::mem::take(&mut shadow.sections);
    shadow.sections = splice_ascending(sections, &section_inserts, |index| ShadowSection {
        key: SectionKey::New(index),
        items: Vec::new(),
    })
    .map_err(|(index, len)| inconsistent!(kind, "section insert at {} with {} present", index, len))?;
    edits.extend(section_inserts.iter().map(|&index| Edit::SectionInsert { index }));

    let mut item_inserts = raw.item_inserts.clone();
    item_inserts.sort_unstable();
    for group in item_inserts.chunk_by(|a, b| a.section == b.section) {
        let index = group[0].section;
        let Some(section) = shadow.sections.get_mut(index) else {
            return Err(inconsistent!(kind, "item insert at {} into missing section", group[0]));
        };
        let at: Vec<usize> = group.iter().map(|path| path.item).collect();
        let items = std::mem::take(&mut section.items);
        section.items = splice_ascending(items, &at, |item| ItemKey::New(ItemPath::new(index, item))).map_err(
            |(item, len)| inconsistent!(kind, "item insert at {} with {} present", ItemPath::new(index, item), len),
        )?;
    }
    edits.extend(item_inserts.iter().map(|&path| Edit::ItemInsert { path }));

    Ok(edits)
}

/// After inserts the shadow must line up with the new snapshot exactly.
fn verify_converged<S: Identity, I: Identity, P>(raw: &RawDiff<'_, S, I, P>, shadow: &Shadow) -> Result<(), ReconcileError> {
    let kind = StageKind::Insert;
    if shadow.sections.len() != raw.new.section_count() {
        return Err(inconsistent!(
            kind,
            "{} sections after staging, expected {}",
            shadow.sections.len(),
            raw.new.section_count()
        ));
    }

    for (index, section) in shadow.sections.iter().enumerate() {
        let expected_key = match raw.section_sources.get(index).copied().flatten() {
            Some(old) => SectionKey::Old(old),
            None => SectionKey::New(index),
        };
        if section.key != expected_key {
            return Err(inconsistent!(kind, "section {} holds {:?}, expected {:?}", index, section.key, expected_key));
        }

        let sources = raw.item_sources.get(index).map(Vec::as_slice).unwrap_or(&[]);
        if section.items.len() != sources.len() {
            return Err(inconsistent!(
                kind,
                "section {} has {} items, expected {}",
                index,
                section.items.len(),
                sources.len()
            ));
        }
        for (item, (actual, source)) in section.items.iter().zip(sources).enumerate() {
            let expected = match source {
                Some(old) => ItemKey::Old(*old),
                None => ItemKey::New(ItemPath::new(index, item)),
            };
            if *actual != expected {
                return Err(inconsistent!(kind, "item {:?} at [{}, {}], expected {:?}", actual, index, item, expected));
            }
        }
    }

    Ok(())
}

fn stage_updates<S, I, P>(raw: &RawDiff<'_, S, I, P>, shadow: &Shadow) -> Result<Vec<Edit>, ReconcileError> {
    let kind = StageKind::Update;
    let mut edits = Vec::with_capacity(raw.section_updates.len() + raw.item_updates.len());

    let mut section_updates: Vec<usize> = raw.section_updates.iter().map(|&(_, new)| new).collect();
    section_updates.sort_unstable();
    for index in section_updates {
        if index >= shadow.sections.len() {
            return Err(inconsistent!(kind, "no section at {} to update", index));
        }
        edits.push(Edit::SectionUpdate { index });
    }

    let mut item_updates: Vec<ItemPath> = raw.item_updates.iter().map(|&(_, new)| new).collect();
    item_updates.sort_unstable();
    for path in item_updates {
        let in_range = shadow
            .sections
            .get(path.section)
            .is_some_and(|section| path.item < section.items.len());
        if !in_range {
            return Err(inconsistent!(kind, "no item at {} to update", path));
        }
        edits.push(Edit::ItemUpdate { path });
    }

    Ok(edits)
}
