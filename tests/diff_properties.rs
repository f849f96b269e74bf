//! Property-based tests for diffing, staging and applying.

use list_reconciler::converters::changeset_to_json;
use list_reconciler::{
    diff, ApplyPath, Coordinator, DiffEngine, Edit, Item, ListTarget, LiveList, Reconciliation, RowAnimation, Section,
    Snapshot, TransactionId,
};
use proptest::prelude::*;
use std::collections::HashSet;

type Snap = Snapshot<u8, u8, u8>;

// =============================================================================
// Test helpers
// =============================================================================

type RawSection = (u8, u8, Vec<(u8, u8)>);

/// Small alphabets so that old and new share plenty of identities.
fn arbitrary_sections() -> impl Strategy<Value = Vec<RawSection>> {
    prop::collection::vec(
        (0u8..6, 0u8..2, prop::collection::vec((0u8..10, 0u8..3), 0..8)),
        0..5,
    )
}

/// Drops repeated identities (first occurrence wins) so construction succeeds.
fn build(raw: &[RawSection]) -> Snap {
    let mut seen_sections = HashSet::new();
    let sections = raw
        .iter()
        .filter(|(id, _, _)| seen_sections.insert(*id))
        .map(|(id, payload, items)| {
            let mut seen_items = HashSet::new();
            Section::new(
                *id,
                *payload,
                items
                    .iter()
                    .filter(|(item, _)| seen_items.insert(*item))
                    .map(|(item, payload)| Item::new(*item, *payload))
                    .collect(),
            )
        })
        .collect();
    Snapshot::new(sections).unwrap()
}

fn replay(old: &Snap, new: &Snap) -> LiveList<u8, u8, u8, u8> {
    let mut list = LiveList::with_payload_cells();
    list.reload(old, TransactionId(0));
    let changeset = diff(old, new).unwrap();
    list.begin_batch(RowAnimation::Automatic);
    for edit in changeset.edits() {
        list.apply_edit(edit, new);
    }
    list.commit_batch(TransactionId(0));
    list
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    /// Replaying the staged edits on a list showing `old` leaves it showing `new`.
    #[test]
    fn staged_edits_converge(old in arbitrary_sections(), new in arbitrary_sections()) {
        let (old, new) = (build(&old), build(&new));
        let list = replay(&old, &new);
        prop_assert!(list.is_showing(&new));
    }

    /// Same through the coordinator's animated path.
    #[test]
    fn coordinator_converges(first in arbitrary_sections(), second in arbitrary_sections()) {
        let (first, second) = (build(&first), build(&second));
        let mut coordinator = Coordinator::new(LiveList::<u8, u8, u8, u8>::with_payload_cells());
        let _ = coordinator.reconcile(first, true, || {});
        let Reconciliation::Started(report) = coordinator.reconcile(second.clone(), true, || {}) else {
            panic!("nothing is in flight");
        };
        prop_assert!(!matches!(report.path, ApplyPath::Reloaded { fallback: Some(_) }), "{:?}", report.path);
        prop_assert!(coordinator.target().is_showing(&second));
        prop_assert_eq!(coordinator.snapshot(), &second);
    }

    /// An identity that stays inside surviving sections is never deleted and re-inserted.
    #[test]
    fn surviving_items_keep_their_identity(old in arbitrary_sections(), new in arbitrary_sections()) {
        let (old, new) = (build(&old), build(&new));
        let raw = DiffEngine::new(&old, &new).raw_diff();

        let deleted: HashSet<u8> = raw
            .item_deletes
            .iter()
            .filter_map(|path| old.identifier_at(*path).copied())
            .collect();
        for path in &raw.item_inserts {
            if raw.section_sources[path.section].is_none() {
                continue;
            }
            let id = new.identifier_at(*path).copied();
            prop_assert!(id.is_some_and(|id| !deleted.contains(&id)), "{:?} deleted and inserted", id);
        }
    }

    /// Items that stay in their section in the same relative order never move,
    /// and the stager emits exactly one edit per raw move.
    #[test]
    fn order_preserving_sections_have_no_moves(old in arbitrary_sections(), new in arbitrary_sections()) {
        let (old, new) = (build(&old), build(&new));
        let raw = DiffEngine::new(&old, &new).raw_diff();

        for (new_section, sources) in raw.item_sources.iter().enumerate() {
            let Some(old_section) = raw.section_sources[new_section] else { continue };
            let kept: Vec<usize> = sources
                .iter()
                .flatten()
                .filter(|source| source.section == old_section)
                .map(|source| source.item)
                .collect();
            if kept.windows(2).all(|w| w[0] < w[1]) {
                let moved_here = raw
                    .item_moves
                    .iter()
                    .filter(|(from, to)| from.section == old_section && to.section == new_section)
                    .count();
                prop_assert_eq!(moved_here, 0);
            }
        }

        let changeset = diff(&old, &new).unwrap();
        prop_assert_eq!(
            changeset.count_matching(|edit| matches!(edit, Edit::ItemMove { .. })),
            raw.item_moves.len()
        );
        prop_assert_eq!(
            changeset.count_matching(|edit| matches!(edit, Edit::SectionMove { .. })),
            raw.section_moves.len()
        );
    }

    #[test]
    fn diff_against_itself_is_empty(raw in arbitrary_sections()) {
        let snapshot = build(&raw);
        prop_assert!(diff(&snapshot, &snapshot).unwrap().is_empty());
        prop_assert!(diff(&snapshot, &build(&raw)).unwrap().is_empty());
    }

    /// Freshly built equal inputs serialize to the same bytes.
    #[test]
    fn diff_is_deterministic(old in arbitrary_sections(), new in arbitrary_sections()) {
        let first = changeset_to_json(&diff(&build(&old), &build(&new)).unwrap()).unwrap();
        let second = changeset_to_json(&diff(&build(&old), &build(&new)).unwrap()).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Stages come out in delete, move, insert, update order, never empty.
    #[test]
    fn stages_follow_canonical_order(old in arbitrary_sections(), new in arbitrary_sections()) {
        let changeset = diff(&build(&old), &build(&new)).unwrap();
        let kinds: Vec<_> = changeset.stages().iter().map(|stage| stage.kind).collect();
        prop_assert!(kinds.windows(2).all(|w| w[0] < w[1]));
        for stage in changeset.stages() {
            prop_assert!(!stage.edits.is_empty());
            prop_assert!(stage.edits.iter().all(|edit| edit.stage_kind() == stage.kind));
        }
    }
}
