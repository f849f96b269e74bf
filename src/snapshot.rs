//! Identity-indexed sectioned snapshots
use crate::errors::ReconcileError;
use crate::types::ItemPath;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// Default payload: a JSON props bag, compared by value for update detection.
pub type Props = serde_json::Value;

/// Anything usable as a section or item identity.
pub trait Identity: Clone + Eq + Hash + Debug {}

impl<T: Clone + Eq + Hash + Debug> Identity for T {}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "I: Serialize, P: Serialize",
    deserialize = "I: Deserialize<'de>, P: Deserialize<'de> + Default"
))]
pub struct Item<I, P = Props> {
    pub id: I,
    #[serde(default)]
    pub payload: P,
}

impl<I, P> Item<I, P> {
    pub fn new(id: I, payload: P) -> Self {
        Item { id, payload }
    }
}

impl<I, P: Default> Item<I, P> {
    pub fn bare(id: I) -> Self {
        Item { id, payload: P::default() }
    }
}

/// Input shape of a section: identity, header/footer payload, ordered items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(
    serialize = "S: Serialize, I: Serialize, P: Serialize",
    deserialize = "S: Deserialize<'de>, I: Deserialize<'de>, P: Deserialize<'de> + Default"
))]
pub struct Section<S, I, P = Props> {
    pub id: S,
    #[serde(default)]
    pub payload: P,
    #[serde(default)]
    pub items: Vec<Item<I, P>>,
}

impl<S, I, P> Section<S, I, P> {
    pub fn new(id: S, payload: P, items: Vec<Item<I, P>>) -> Self {
        Section { id, payload, items }
    }
}

impl<S, I, P: Default> Section<S, I, P> {
    /// Section whose section and item payloads are all `P::default()`.
    pub fn with_ids(id: S, item_ids: impl IntoIterator<Item = I>) -> Self {
        Section {
            id,
            payload: P::default(),
            items: item_ids.into_iter().map(Item::bare).collect(),
        }
    }
}

#[derive(Debug, Clone)]
struct SectionEntry<I, P> {
    payload: P,
    items: IndexMap<I, P>,
}

/// Immutable ordered collection of sections.
///
/// Section identities are unique in the snapshot and item identities are
/// unique inside their section. Every identity lookup is answered from
/// indexes built once at construction.
#[derive(Debug, Clone)]
pub struct Snapshot<S, I, P = Props> {
    sections: IndexMap<S, SectionEntry<I, P>>,
    // Items may share an identity across sections, hence several paths.
    locations: HashMap<I, Vec<ItemPath>>,
    total_items: usize,
}

impl<S: Identity, I: Identity, P> Snapshot<S, I, P> {
    pub fn empty() -> Self {
        Snapshot {
            sections: IndexMap::new(),
            locations: HashMap::new(),
            total_items: 0,
        }
    }

    pub fn new(sections: Vec<Section<S, I, P>>) -> Result<Self, ReconcileError> {
        let mut indexed: IndexMap<S, SectionEntry<I, P>> = IndexMap::with_capacity(sections.len());
        let mut locations: HashMap<I, Vec<ItemPath>> = HashMap::new();
        let mut total_items = 0;

        for (section_idx, section) in sections.into_iter().enumerate() {
            if indexed.contains_key(&section.id) {
                return Err(ReconcileError::DuplicateIdentity {
                    scope: "snapshot".to_string(),
                    identity: format!("{:?}", section.id),
                });
            }

            let mut items = IndexMap::with_capacity(section.items.len());
            for item in section.items {
                if items.contains_key(&item.id) {
                    return Err(ReconcileError::DuplicateIdentity {
                        scope: format!("section {:?}", section.id),
                        identity: format!("{:?}", item.id),
                    });
                }
                locations
                    .entry(item.id.clone())
                    .or_default()
                    .push(ItemPath::new(section_idx, items.len()));
                items.insert(item.id, item.payload);
            }

            total_items += items.len();
            indexed.insert(
                section.id,
                SectionEntry {
                    payload: section.payload,
                    items,
                },
            );
        }

        log::trace!(
            "Snapshot: built {} sections, {} items",
            indexed.len(),
            total_items
        );

        Ok(Snapshot {
            sections: indexed,
            locations,
            total_items,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn total_items(&self) -> usize {
        self.total_items
    }

    /// Number of items in the section at `section`, if it exists.
    pub fn item_count(&self, section: usize) -> Option<usize> {
        self.sections.get_index(section).map(|(_, entry)| entry.items.len())
    }

    pub fn section_index(&self, id: &S) -> Option<usize> {
        self.sections.get_index_of(id)
    }

    pub fn section_id(&self, index: usize) -> Option<&S> {
        self.sections.get_index(index).map(|(id, _)| id)
    }

    pub fn section_payload(&self, index: usize) -> Option<&P> {
        self.sections.get_index(index).map(|(_, entry)| &entry.payload)
    }

    pub fn section_ids(&self) -> impl Iterator<Item = &S> {
        self.sections.keys()
    }

    /// Item identities of one section in order; empty when out of range.
    pub fn item_ids(&self, section: usize) -> impl Iterator<Item = &I> {
        self.sections
            .get_index(section)
            .into_iter()
            .flat_map(|(_, entry)| entry.items.keys())
    }

    pub fn item(&self, path: ItemPath) -> Option<(&I, &P)> {
        self.sections
            .get_index(path.section)
            .and_then(|(_, entry)| entry.items.get_index(path.item))
    }

    pub fn identifier_at(&self, path: ItemPath) -> Option<&I> {
        self.item(path).map(|(id, _)| id)
    }

    pub fn item_payload(&self, path: ItemPath) -> Option<&P> {
        self.item(path).map(|(_, payload)| payload)
    }

    /// Position of `item` inside the section identified by `section`.
    pub fn item_path(&self, section: &S, item: &I) -> Option<ItemPath> {
        let (section_idx, _, entry) = self.sections.get_full(section)?;
        entry
            .items
            .get_index_of(item)
            .map(|item_idx| ItemPath::new(section_idx, item_idx))
    }

    /// Every position holding `item`, in snapshot order.
    pub fn locate(&self, item: &I) -> &[ItemPath] {
        self.locations.get(item).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_item_paths(&self) -> impl Iterator<Item = ItemPath> + '_ {
        self.sections
            .values()
            .enumerate()
            .flat_map(|(section_idx, entry)| {
                (0..entry.items.len()).map(move |item_idx| ItemPath::new(section_idx, item_idx))
            })
    }
}

impl<S: Identity, I: Identity, P: Clone> Snapshot<S, I, P> {
    pub fn to_sections(&self) -> Vec<Section<S, I, P>> {
        self.sections
            .iter()
            .map(|(id, entry)| Section {
                id: id.clone(),
                payload: entry.payload.clone(),
                items: entry
                    .items
                    .iter()
                    .map(|(item_id, payload)| Item::new(item_id.clone(), payload.clone()))
                    .collect(),
            })
            .collect()
    }
}

impl<S: Identity, I: Identity, P> Default for Snapshot<S, I, P> {
    fn default() -> Self {
        Snapshot::empty()
    }
}

impl<S: Identity, I: Identity, P> TryFrom<Vec<Section<S, I, P>>> for Snapshot<S, I, P> {
    type Error = ReconcileError;

    fn try_from(sections: Vec<Section<S, I, P>>) -> Result<Self, Self::Error> {
        Snapshot::new(sections)
    }
}

// IndexMap equality ignores order, snapshots do not.
impl<S: Identity, I: Identity, P: PartialEq> PartialEq for Snapshot<S, I, P> {
    fn eq(&self, other: &Self) -> bool {
        self.sections.len() == other.sections.len()
            && self
                .sections
                .iter()
                .zip(other.sections.iter())
                .all(|((id_a, a), (id_b, b))| {
                    id_a == id_b
                        && a.payload == b.payload
                        && a.items.len() == b.items.len()
                        && a.items.iter().eq(b.items.iter())
                })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn section(id: &str, items: &[&str]) -> Section<String, String, ()> {
        Section::with_ids(id.to_string(), items.iter().map(|s| s.to_string()))
    }

    #[test]
    fn rejects_duplicate_section_identity() {
        let err = Snapshot::new(vec![section("s1", &["a"]), section("s1", &["b"])]).unwrap_err();
        match err {
            ReconcileError::DuplicateIdentity { scope, identity } => {
                assert_eq!(scope, "snapshot");
                assert_eq!(identity, "\"s1\"");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn rejects_duplicate_item_within_section() {
        let err = Snapshot::new(vec![section("s1", &["a", "b", "a"])]).unwrap_err();
        assert!(matches!(err, ReconcileError::DuplicateIdentity { ref scope, .. } if scope == "section \"s1\""));
    }

    #[test]
    fn same_item_identity_may_live_in_two_sections() {
        let snapshot = Snapshot::new(vec![section("s1", &["a"]), section("s2", &["b", "a"])]).unwrap();
        assert_eq!(
            snapshot.locate(&"a".to_string()),
            &[ItemPath::new(0, 0), ItemPath::new(1, 1)]
        );
        assert_eq!(snapshot.total_items(), 3);
    }

    #[test]
    fn lookups_by_identity_and_position_agree() {
        let snapshot = Snapshot::new(vec![section("s1", &["a", "b"]), section("s2", &["c"])]).unwrap();
        let s2 = "s2".to_string();
        let c = "c".to_string();
        assert_eq!(snapshot.section_index(&s2), Some(1));
        assert_eq!(snapshot.item_path(&s2, &c), Some(ItemPath::new(1, 0)));
        assert_eq!(snapshot.identifier_at(ItemPath::new(0, 1)), Some(&"b".to_string()));
        assert_eq!(snapshot.item_count(0), Some(2));
        assert_eq!(snapshot.item_count(2), None);
        assert_eq!(snapshot.item_ids(7).count(), 0);
        assert_eq!(snapshot.all_item_paths().count(), 3);
    }

    #[test]
    fn equality_is_order_sensitive() {
        let a = Snapshot::new(vec![section("s1", &["a", "b"])]).unwrap();
        let b = Snapshot::new(vec![section("s1", &["b", "a"])]).unwrap();
        let c = Snapshot::new(a.to_sections()).unwrap();
        assert_ne!(a, b);
        assert_eq!(a, c);
    }

    #[test]
    fn sections_deserialize_with_default_payloads() {
        let section: Section<String, String> =
            serde_json::from_str(r#"{"id": "s1", "items": [{"id": "a"}, {"id": "b", "payload": {"title": "B"}}]}"#)
                .unwrap();
        assert_eq!(section.payload, Props::Null);
        assert_eq!(section.items[1].payload["title"], "B");
    }
}
