//! # Gradient/Weight Store (spec.md §4.10)
//!
//! A narrow namespaced key-value facade. Three logical keys exist per user:
//!
//! - `{namespace}/{user_id}/reranker/state` → [`RerankerState`]
//! - `{namespace}/{user_id}/reranker/gradient-accumulator` → [`GradientAccumulator`]
//! - `{namespace}/{user_id}/buffer/{message-buffer,staging}` → [`MessageBuffer`]
//!
//! Loads are validated against the expected shape; a validation failure
//! returns a fresh default rather than propagating, per spec.md §7's
//! `SchemaValidationFailure` → "return defaults; log" policy. Writes are
//! best-effort and return a success boolean rather than throwing, matching
//! spec.md §4.10's "Writes are best-effort" requirement.

use async_lock::RwLock;
use serde::{Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

use crate::types::{GradientAccumulator, MessageBuffer, RerankerState};

const RERANKER_STATE: &str = "reranker/state";
const GRADIENT_ACCUMULATOR: &str = "reranker/gradient-accumulator";
const MESSAGE_BUFFER: &str = "buffer/message-buffer";
const STAGING_BUFFER: &str = "buffer/staging";

fn key(namespace: &str, user_id: &str, suffix: &str) -> String {
    format!("{namespace}/{user_id}/{suffix}")
}

/// Narrow persistence interface consumed by the reflective memory core.
///
/// Any namespaced key-value backend implementing `get`/`put`/`delete` over
/// opaque byte strings suffices; this crate ships [`InMemoryStore`] as a
/// usable default for tests and single-process deployments.
pub trait PersistenceStore: Send + Sync {
    /// Fetches the raw bytes stored at `key`, if any.
    fn get(&self, key: &str) -> impl std::future::Future<Output = Option<Vec<u8>>> + Send;

    /// Stores `value` at `key`. Returns `true` on success, `false` on any
    /// failure — writes never propagate an error.
    fn put(&self, key: &str, value: Vec<u8>) -> impl std::future::Future<Output = bool> + Send;

    /// Deletes the value at `key`, if present. Best-effort.
    fn delete(&self, key: &str) -> impl std::future::Future<Output = bool> + Send;
}

/// `BTreeMap`-backed, lock-guarded default [`PersistenceStore`].
///
/// Grounded in `async-lock`, already a direct dependency of the teacher's
/// `mem0` crate.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl PersistenceStore for InMemoryStore {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.entries.read().await.get(key).cloned()
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> bool {
        self.entries.write().await.insert(key.to_string(), value);
        true
    }

    async fn delete(&self, key: &str) -> bool {
        self.entries.write().await.remove(key);
        true
    }
}

async fn load_json<T, S>(store: &S, key: &str) -> Option<T>
where
    T: DeserializeOwned,
    S: PersistenceStore,
{
    let bytes = store.get(key).await?;
    match serde_json::from_slice::<T>(&bytes) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(key, error = %err, "schema validation failed on load, using default");
            None
        }
    }
}

async fn save_json<T, S>(store: &S, key: &str, value: &T) -> bool
where
    T: Serialize,
    S: PersistenceStore,
{
    match serde_json::to_vec(value) {
        Ok(bytes) => {
            let ok = store.put(key, bytes).await;
            if !ok {
                tracing::warn!(key, "persistence save failed, keeping in-memory state");
            }
            ok
        }
        Err(err) => {
            tracing::warn!(key, error = %err, "failed to serialise value for persistence");
            false
        }
    }
}

/// Loads the [`RerankerState`] for `user_id`, or `None` if absent/invalid.
pub async fn load_reranker_state<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
) -> Option<RerankerState> {
    load_json(store, &key(namespace, user_id, RERANKER_STATE)).await
}

/// Saves the [`RerankerState`] for `user_id`. Returns `true` on success.
pub async fn save_reranker_state<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
    state: &RerankerState,
) -> bool {
    save_json(store, &key(namespace, user_id, RERANKER_STATE), state).await
}

/// Loads the [`GradientAccumulator`] for `user_id`, or `None` if
/// absent/invalid (the caller should substitute a fresh zero accumulator).
pub async fn load_gradient_accumulator<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
) -> Option<GradientAccumulator> {
    load_json(store, &key(namespace, user_id, GRADIENT_ACCUMULATOR)).await
}

/// Saves the [`GradientAccumulator`] for `user_id`.
pub async fn save_gradient_accumulator<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
    accumulator: &GradientAccumulator,
) -> bool {
    save_json(
        store,
        &key(namespace, user_id, GRADIENT_ACCUMULATOR),
        accumulator,
    )
    .await
}

/// Loads the live [`MessageBuffer`] for `user_id`.
pub async fn load_message_buffer<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
) -> MessageBuffer {
    load_json(store, &key(namespace, user_id, MESSAGE_BUFFER))
        .await
        .unwrap_or_default()
}

/// Saves the live [`MessageBuffer`] for `user_id`.
pub async fn save_message_buffer<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
    buffer: &MessageBuffer,
) -> bool {
    save_json(store, &key(namespace, user_id, MESSAGE_BUFFER), buffer).await
}

/// Loads the staging snapshot for `user_id`, if one is in flight.
pub async fn load_staging_buffer<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
) -> Option<MessageBuffer> {
    load_json(store, &key(namespace, user_id, STAGING_BUFFER)).await
}

/// Writes a staging snapshot for `user_id`, taken before any asynchronous
/// reflection work begins (spec.md §4.5 step 2).
pub async fn save_staging_buffer<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
    buffer: &MessageBuffer,
) -> bool {
    save_json(store, &key(namespace, user_id, STAGING_BUFFER), buffer).await
}

/// Clears the staging snapshot for `user_id` after reflection completes
/// successfully. Never called on failure — the staging slot is the crash
/// recovery mechanism (spec.md §5, §8).
pub async fn clear_staging_buffer<S: PersistenceStore>(
    store: &S,
    namespace: &str,
    user_id: &str,
) -> bool {
    store.delete(&key(namespace, user_id, STAGING_BUFFER)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::zero_matrix;
    use crate::types::RerankerConfig;

    #[tokio::test]
    async fn reranker_state_round_trips() {
        let store = InMemoryStore::new();
        let state = RerankerState {
            query_transform: zero_matrix(3, 3),
            memory_transform: zero_matrix(3, 3),
            config: RerankerConfig::new(3),
        };
        assert!(save_reranker_state(&store, "ns", "u1", &state).await);
        let loaded = load_reranker_state(&store, "ns", "u1").await.unwrap();
        assert_eq!(loaded.query_transform, state.query_transform);
        assert_eq!(loaded.memory_transform, state.memory_transform);
    }

    #[tokio::test]
    async fn missing_key_returns_none() {
        let store = InMemoryStore::new();
        assert!(load_reranker_state(&store, "ns", "ghost").await.is_none());
    }

    #[tokio::test]
    async fn corrupted_value_returns_none_not_panic() {
        let store = InMemoryStore::new();
        store.put("ns/u1/reranker/state", b"not json".to_vec()).await;
        assert!(load_reranker_state(&store, "ns", "u1").await.is_none());
    }

    #[tokio::test]
    async fn staging_is_independent_of_live_buffer() {
        let store = InMemoryStore::new();
        let mut live = MessageBuffer::default();
        live.push("user", "hello");
        save_message_buffer(&store, "ns", "u1", &live).await;

        let mut staged = live.clone();
        save_staging_buffer(&store, "ns", "u1", &staged).await;

        // A new message arrives on the live buffer during reflection.
        live.push("user", "second message");
        save_message_buffer(&store, "ns", "u1", &live).await;

        let reloaded_live = load_message_buffer(&store, "ns", "u1").await;
        assert_eq!(reloaded_live.turns.len(), 2);

        staged = load_staging_buffer(&store, "ns", "u1").await.unwrap();
        assert_eq!(staged.turns.len(), 1);

        assert!(clear_staging_buffer(&store, "ns", "u1").await);
        assert!(load_staging_buffer(&store, "ns", "u1").await.is_none());
    }
}
