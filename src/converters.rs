//! JSON conversion for snapshots and changesets
use crate::errors::ReconcileError;
use crate::snapshot::{Identity, Props, Section, Snapshot};
use crate::types::Changeset;
use serde::Serialize;

/// Snapshot keyed by strings with JSON props payloads.
pub type JsonSnapshot = Snapshot<String, String, Props>;

/// Parse `[{"id": .., "payload": .., "items": [{"id": .., "payload": ..}]}]`.
/// Missing payloads default to `null`.
pub fn snapshot_from_json(value: &serde_json::Value) -> Result<JsonSnapshot, ReconcileError> {
    let sections: Vec<Section<String, String, Props>> = serde_json::from_value(value.clone())?;
    Snapshot::new(sections)
}

pub fn snapshot_from_str(json: &str) -> Result<JsonSnapshot, ReconcileError> {
    let sections: Vec<Section<String, String, Props>> = serde_json::from_str(json)?;
    Snapshot::new(sections)
}

pub fn snapshot_to_json<S, I, P>(snapshot: &Snapshot<S, I, P>) -> Result<serde_json::Value, ReconcileError>
where
    S: Identity + Serialize,
    I: Identity + Serialize,
    P: Clone + Serialize,
{
    Ok(serde_json::to_value(snapshot.to_sections())?)
}

/// Compact JSON of every stage and edit. Equal inputs give identical bytes.
pub fn changeset_to_json(changeset: &Changeset) -> Result<String, ReconcileError> {
    Ok(serde_json::to_string(changeset)?)
}
