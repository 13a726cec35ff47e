//! Saga state persistence.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::state::SagaState;

/// Storage for saga state, one row per order.
#[async_trait]
pub trait SagaStore: Send + Sync {
    async fn get(&self, order_id: OrderId) -> Result<Option<SagaState>>;

    /// Stores a new saga. Fails with `AlreadyExists` if the order has one.
    async fn create(&self, state: &SagaState) -> Result<()>;

    /// Overwrites a saga if its stored version still equals `state.version`.
    ///
    /// Returns the stored state with its version bumped.
    async fn update(&self, state: SagaState) -> Result<SagaState>;

    /// Lists sagas waiting for operator intervention.
    async fn list_stuck(&self) -> Result<Vec<SagaState>>;
}

/// In-memory saga store.
#[derive(Debug, Clone, Default)]
pub struct InMemorySagaStore {
    sagas: Arc<RwLock<HashMap<OrderId, SagaState>>>,
}

impl InMemorySagaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sagas.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sagas.read().await.is_empty()
    }
}

#[async_trait]
impl SagaStore for InMemorySagaStore {
    async fn get(&self, order_id: OrderId) -> Result<Option<SagaState>> {
        Ok(self.sagas.read().await.get(&order_id).cloned())
    }

    async fn create(&self, state: &SagaState) -> Result<()> {
        let mut sagas = self.sagas.write().await;
        if sagas.contains_key(&state.order_id) {
            return Err(SagaError::AlreadyExists(state.order_id));
        }
        sagas.insert(state.order_id, state.clone());
        Ok(())
    }

    async fn update(&self, mut state: SagaState) -> Result<SagaState> {
        let mut sagas = self.sagas.write().await;
        let stored = sagas
            .get_mut(&state.order_id)
            .ok_or(SagaError::NotFound(state.order_id))?;

        if stored.version != state.version {
            return Err(SagaError::VersionConflict {
                order_id: state.order_id,
                expected: state.version,
                actual: stored.version,
            });
        }

        state.version += 1;
        *stored = state.clone();
        Ok(state)
    }

    async fn list_stuck(&self) -> Result<Vec<SagaState>> {
        let sagas = self.sagas.read().await;
        let mut stuck: Vec<SagaState> = sagas.values().filter(|s| s.is_stuck()).cloned().collect();
        stuck.sort_by_key(|s| s.updated_at);
        Ok(stuck)
    }
}
