//! Slice-based state container.
//!
//! Each entity owns a named slice of state and a reducer that applies
//! completed async operations to it. Slices are collected by a
//! [`StoreBuilder`] at composition time and assembled once into a live
//! [`Store`]; there is no process-wide registry. Reducers are pure: they
//! either produce the next slice state or reject the settlement with a
//! [`NormalizedError`], in which case the slice is left exactly as it was
//! and the rejection surfaces from [`Store::dispatch`].

use std::{collections::HashMap, sync::Arc};

use serde_json::Value;
use shared::{
    error::NormalizedError,
    protocol::{Op, Settlement},
};
use thiserror::Error;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

const UPDATE_CHANNEL_CAPACITY: usize = 256;

/// State owned by a single entity slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SliceState {
    pub all_items: Vec<Value>,
    pub item: Value,
}

impl Default for SliceState {
    fn default() -> Self {
        Self {
            all_items: Vec::new(),
            item: Value::Null,
        }
    }
}

/// A completed async operation routed to the slice named by `entity`.
#[derive(Debug, Clone)]
pub struct Action {
    pub entity: String,
    pub op: Op,
    pub payload: Settlement,
}

impl Action {
    pub fn new(entity: impl Into<String>, op: Op, payload: Settlement) -> Self {
        Self {
            entity: entity.into(),
            op,
            payload,
        }
    }
}

/// Pure state transition for one slice.
pub type Reducer =
    Arc<dyn Fn(&SliceState, &Action) -> Result<SliceState, NormalizedError> + Send + Sync>;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no slice registered for entity {0:?}")]
    UnregisteredSlice(String),
    #[error("slice {entity:?} rejected {op} settlement: {source}")]
    Rejected {
        entity: String,
        op: Op,
        #[source]
        source: NormalizedError,
    },
}

impl DispatchError {
    /// The normalized error carried by a rejected settlement, if any.
    pub fn rejection(&self) -> Option<&NormalizedError> {
        match self {
            DispatchError::Rejected { source, .. } => Some(source),
            DispatchError::UnregisteredSlice(_) => None,
        }
    }
}

/// Returns the settled body, or the normalized error the settlement carries.
/// A business error embedded in a success body counts as an error, so a
/// reducer calling this first can never apply an error payload to state.
pub fn settled_data(action: &Action) -> Result<&Value, NormalizedError> {
    match &action.payload {
        Settlement::Error(err) => Err(err.clone()),
        Settlement::Data(body) => match NormalizedError::from_body(body) {
            Some(err) => Err(err),
            None => Ok(body),
        },
    }
}

/// The generic CRUD reducer. Operates on settled bodies of shape
/// `{"data": ...}`:
///
/// - create: `item = data`, appended to `all_items`
/// - getMany: `all_items` fully replaced by the list in `data`
/// - getOne: `item = data`
/// - delete: items whose `id` equals `data.id` are removed, order preserved
/// - update: `item = data.updated`
/// - patch: no transition (the guard still rejects error settlements)
pub fn crud_reducer() -> Reducer {
    Arc::new(|state, action| {
        let body = settled_data(action)?;
        let data = body.get("data").cloned().unwrap_or(Value::Null);
        let mut next = state.clone();
        match action.op {
            Op::Create => {
                next.item = data.clone();
                next.all_items.push(data);
            }
            Op::GetMany => match data {
                Value::Array(items) => next.all_items = items,
                other => {
                    return Err(NormalizedError::invalid_payload(
                        "getMany settlement did not carry a list",
                        other,
                    ))
                }
            },
            Op::GetOne => {
                next.item = data;
            }
            Op::Delete => {
                let Some(deleted_id) = data.get("id").cloned() else {
                    return Err(NormalizedError::invalid_payload(
                        "delete settlement did not identify the deleted item",
                        data,
                    ));
                };
                next.all_items
                    .retain(|item| item.get("id") != Some(&deleted_id));
            }
            Op::Update => match data.get("updated") {
                Some(updated) => next.item = updated.clone(),
                None => {
                    return Err(NormalizedError::invalid_payload(
                        "update settlement did not carry the updated item",
                        data,
                    ))
                }
            },
            Op::Patch => {}
        }
        Ok(next)
    })
}

/// Emitted after a slice transition commits.
#[derive(Debug, Clone)]
pub struct StoreUpdate {
    pub entity: String,
    pub op: Op,
}

struct Slot {
    state: SliceState,
    reducer: Reducer,
}

/// Live store holding every registered slice. Shared mutable state behind an
/// async lock so dispatches from concurrent tasks serialize; the later of
/// two racing settlements for the same entity determines final state.
pub struct Store {
    slices: RwLock<HashMap<String, Slot>>,
    updates: broadcast::Sender<StoreUpdate>,
}

impl Store {
    /// Applies `action` to the slice it names. On a committed transition the
    /// new state is swapped in and subscribers are notified; on a rejection
    /// the slice is untouched and the rejection is returned, making the
    /// dispatch call the error boundary.
    pub async fn dispatch(&self, action: Action) -> Result<(), DispatchError> {
        let mut slices = self.slices.write().await;
        let slot = slices
            .get_mut(&action.entity)
            .ok_or_else(|| DispatchError::UnregisteredSlice(action.entity.clone()))?;
        match (slot.reducer)(&slot.state, &action) {
            Ok(next) => {
                slot.state = next;
                debug!(
                    entity = %action.entity,
                    op = %action.op,
                    items = slot.state.all_items.len(),
                    "slice updated"
                );
                let _ = self.updates.send(StoreUpdate {
                    entity: action.entity,
                    op: action.op,
                });
                Ok(())
            }
            Err(source) => Err(DispatchError::Rejected {
                entity: action.entity,
                op: action.op,
                source,
            }),
        }
    }

    /// Snapshot of one slice's current state.
    pub async fn state(&self, entity: &str) -> Option<SliceState> {
        self.slices
            .read()
            .await
            .get(entity)
            .map(|slot| slot.state.clone())
    }

    /// Names of every registered slice, sorted.
    pub async fn entities(&self) -> Vec<String> {
        let mut names: Vec<String> = self.slices.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn subscribe_updates(&self) -> broadcast::Receiver<StoreUpdate> {
        self.updates.subscribe()
    }
}

/// Collects entity slices and assembles them into a live [`Store`].
///
/// Registration conflict policy: the last registration for a name wins and
/// the replacement is logged, so after `build()` each name maps to exactly
/// one live reducer.
#[derive(Default)]
pub struct StoreBuilder {
    slices: Vec<(String, Reducer)>,
}

impl StoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slice(mut self, name: impl Into<String>, reducer: Reducer) -> Self {
        let name = name.into();
        if let Some(existing) = self.slices.iter_mut().find(|(slice, _)| *slice == name) {
            warn!(entity = %name, "replacing previously registered slice");
            existing.1 = reducer;
        } else {
            self.slices.push((name, reducer));
        }
        self
    }

    /// Registers `name` with the generic CRUD reducer.
    pub fn crud_slice(self, name: impl Into<String>) -> Self {
        self.slice(name, crud_reducer())
    }

    pub fn build(self) -> Arc<Store> {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        let slices = self
            .slices
            .into_iter()
            .map(|(name, reducer)| {
                (
                    name,
                    Slot {
                        state: SliceState::default(),
                        reducer,
                    },
                )
            })
            .collect();
        Arc::new(Store {
            slices: RwLock::new(slices),
            updates,
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
