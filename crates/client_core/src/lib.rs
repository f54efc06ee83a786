//! Client-side glue between a REST backend, a websocket push channel and the
//! slice [`Store`].
//!
//! Entities are registered once on a [`ClientBuilder`]; building yields a
//! [`CrudClient`] holding the assembled store, one [`EntityActions`] handle
//! per entity, and the push routing table. An inbound push message names an
//! entity and optionally an item id; the router reacts by refetching the one
//! item or the whole collection through the same async-action path a UI
//! event would use.

use std::{collections::HashMap, sync::Arc};

use anyhow::{Context, Result};
use futures::StreamExt;
use serde_json::{json, Value};
use shared::protocol::{Op, PushMessage};
use store::{Action, DispatchError, Reducer, Store, StoreBuilder};
use thiserror::Error;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{error, info, warn};

pub mod config;
pub mod transport;

pub use transport::{Backend, RestBackend, TransportError};

/// Async CRUD actions bound to one entity slice.
///
/// Every call is one independent unit of work: execute the backing HTTP
/// operation, then dispatch the settlement into the store. There is no
/// dedup, retry or cancellation across concurrent calls; the last settlement
/// to be dispatched wins in slice state.
pub struct EntityActions {
    entity: String,
    path: String,
    backend: Arc<dyn Backend>,
    store: Arc<Store>,
}

#[derive(Debug, Error)]
pub enum ActionError {
    /// The server never replied; nothing was dispatched.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The settlement was dispatched and the slice rejected it.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl EntityActions {
    pub fn entity(&self) -> &str {
        &self.entity
    }

    /// The generic operation every convenience method funnels through.
    pub async fn run(&self, op: Op, params: Value) -> Result<(), ActionError> {
        let settlement = self.backend.execute(&self.path, op, params).await?;
        self.store
            .dispatch(Action::new(self.entity.clone(), op, settlement))
            .await?;
        Ok(())
    }

    pub async fn create(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::Create, params).await
    }

    pub async fn get_many(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::GetMany, params).await
    }

    pub async fn get_one(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::GetOne, params).await
    }

    pub async fn delete(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::Delete, params).await
    }

    pub async fn update(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::Update, params).await
    }

    pub async fn patch(&self, params: Value) -> Result<(), ActionError> {
        self.run(Op::Patch, params).await
    }
}

struct EntityDef {
    name: String,
    path: String,
    reducer: Reducer,
}

/// Collects entities at composition time and assembles the client once.
///
/// Registering an entity wires its slice reducer and its push route
/// together. Duplicate names follow the store's policy: the last
/// registration wins and the replacement is logged.
#[derive(Default)]
pub struct ClientBuilder {
    backend: Option<Arc<dyn Backend>>,
    entities: Vec<EntityDef>,
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_backend(mut self, backend: Arc<dyn Backend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn with_api_url(self, api_url: &str) -> Result<Self, TransportError> {
        let backend = RestBackend::new(api_url)?;
        Ok(self.with_backend(Arc::new(backend)))
    }

    /// Registers an entity served at the path equal to its name.
    pub fn entity(self, name: &str) -> Self {
        self.entity_at(name, name)
    }

    /// Registers an entity with a custom REST path.
    pub fn entity_at(self, name: &str, path: &str) -> Self {
        self.entity_with_reducer(name, path, store::crud_reducer())
    }

    pub fn entity_with_reducer(mut self, name: &str, path: &str, reducer: Reducer) -> Self {
        if let Some(existing) = self.entities.iter_mut().find(|def| def.name == name) {
            warn!(entity = %name, "replacing previously registered entity");
            existing.path = path.to_string();
            existing.reducer = reducer;
        } else {
            self.entities.push(EntityDef {
                name: name.to_string(),
                path: path.to_string(),
                reducer,
            });
        }
        self
    }

    pub fn build(self) -> Result<CrudClient> {
        let backend = self
            .backend
            .context("client builder needs a backend or api url")?;

        let mut store_builder = StoreBuilder::new();
        for def in &self.entities {
            store_builder = store_builder.slice(def.name.clone(), def.reducer.clone());
        }
        let store = store_builder.build();

        let entities = self
            .entities
            .into_iter()
            .map(|def| {
                let actions = Arc::new(EntityActions {
                    entity: def.name.clone(),
                    path: def.path,
                    backend: Arc::clone(&backend),
                    store: Arc::clone(&store),
                });
                (def.name, actions)
            })
            .collect();

        Ok(CrudClient { store, entities })
    }
}

#[derive(Debug, Error)]
pub enum PushError {
    #[error("push message is not valid JSON: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("push message names unregistered entity {0:?}")]
    UnknownEntity(String),
    #[error("refetch after push failed: {0}")]
    Refetch(#[from] ActionError),
}

/// The assembled client: the live store plus one action handle and one push
/// route per registered entity.
pub struct CrudClient {
    store: Arc<Store>,
    entities: HashMap<String, Arc<EntityActions>>,
}

impl std::fmt::Debug for CrudClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrudClient")
            .field("entities", &self.entities.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl CrudClient {
    pub fn store(&self) -> Arc<Store> {
        Arc::clone(&self.store)
    }

    pub fn actions(&self, entity: &str) -> Option<Arc<EntityActions>> {
        self.entities.get(entity).map(Arc::clone)
    }

    /// Routes one inbound push message to the owning slice's refetch action.
    /// A message with an `id` refetches that item, one without refetches the
    /// whole collection; either way exactly one dispatch happens.
    pub async fn handle_push(&self, raw: &str) -> Result<(), PushError> {
        let message: PushMessage = serde_json::from_str(raw)?;
        let actions = self
            .entities
            .get(&message.entity)
            .ok_or_else(|| PushError::UnknownEntity(message.entity.clone()))?;
        match message.id {
            Some(id) => actions.run(Op::GetOne, json!({ "id": id })).await?,
            None => actions.run(Op::GetMany, Value::Null).await?,
        }
        Ok(())
    }

    /// Connects the push channel and routes messages until the socket
    /// closes. A message that fails to route is logged and skipped; one bad
    /// frame must not kill the channel.
    pub async fn run_push_loop(&self, ws_url: &str) -> Result<()> {
        let (ws_stream, _) = connect_async(ws_url)
            .await
            .with_context(|| format!("failed to connect websocket: {ws_url}"))?;
        let (_, mut reader) = ws_stream.split();
        info!(%ws_url, "push channel connected");

        while let Some(frame) = reader.next().await {
            match frame {
                Ok(Message::Text(text)) => {
                    if let Err(err) = self.handle_push(&text).await {
                        warn!(%err, "push message not applied");
                    }
                }
                Ok(Message::Close(_)) => break,
                Ok(_) => {}
                Err(err) => {
                    error!(%err, "websocket receive failed");
                    break;
                }
            }
        }

        info!(%ws_url, "push channel closed");
        Ok(())
    }

    /// Spawns [`run_push_loop`](Self::run_push_loop) on the runtime; a
    /// failed connect or terminated loop is logged, not returned.
    pub fn spawn_push_loop(self: &Arc<Self>, ws_url: String) -> tokio::task::JoinHandle<()> {
        let client = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = client.run_push_loop(&ws_url).await {
                error!(%err, "push loop terminated");
            }
        })
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
