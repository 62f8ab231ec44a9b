//! Pending invocation registry.
//!
//! Maps invocation ids to completion callbacks. Ids come from a counter and
//! are never reused by one registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Value, json};
use tracing::warn;

use hublink_connection::guard::call_guarded;

/// Completion callback; receives the completion record or a teardown payload.
pub type CompletionCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Builds the `{"error": message}` payload used for bulk teardown.
pub fn error_payload(message: &str) -> Value {
    json!({ "error": message })
}

pub struct CallbackManager {
    next_id: AtomicU64,
    callbacks: Mutex<HashMap<String, CompletionCallback>>,
    drop_payload: Value,
}

impl CallbackManager {
    /// `drop_payload` is delivered to every callback still pending when the
    /// registry is dropped.
    pub fn new(drop_payload: Value) -> Self {
        Self {
            next_id: AtomicU64::new(0),
            callbacks: Mutex::new(HashMap::new()),
            drop_payload,
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CompletionCallback>> {
        self.callbacks.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores `callback` and returns its new id.
    pub fn register_callback(&self, callback: impl Fn(&Value) + Send + Sync + 'static) -> String {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
        self.lock().insert(id.clone(), Arc::new(callback));
        id
    }

    /// Invokes the callback for `id`, removing it first if `remove` is set.
    /// Returns `false` if no callback is registered under `id`.
    pub fn invoke_callback(&self, id: &str, payload: &Value, remove: bool) -> bool {
        let callback = {
            let mut callbacks = self.lock();
            if remove {
                callbacks.remove(id)
            } else {
                callbacks.get(id).cloned()
            }
        };

        match callback {
            Some(callback) => {
                callback(payload);
                true
            }
            None => false,
        }
    }

    /// Removes the callback for `id` without invoking it.
    pub fn remove_callback(&self, id: &str) -> bool {
        self.lock().remove(id).is_some()
    }

    /// Invokes and removes every pending callback.
    ///
    /// A panicking callback is logged and does not prevent the others from
    /// running.
    pub fn clear(&self, payload: &Value) {
        let pending = std::mem::take(&mut *self.lock());
        for (id, callback) in pending {
            if let Err(panic) = call_guarded(|| callback(payload)) {
                warn!(%id, "completion callback panicked during teardown: {panic}");
            }
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

impl Default for CallbackManager {
    fn default() -> Self {
        Self::new(error_payload(
            "connection went out of scope before invocation result was received",
        ))
    }
}

impl Drop for CallbackManager {
    fn drop(&mut self) {
        let payload = std::mem::take(&mut self.drop_payload);
        self.clear(&payload);
    }
}
