use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// A typed key for values carried by a [`Context`].
///
/// Each key is its own type, so two components can never collide on a
/// key the way they could with string names.
///
/// ```
/// use kube_e2e::context::{Context, ContextKey};
///
/// struct ClusterName;
/// impl ContextKey for ClusterName {
///     type Value = String;
/// }
///
/// let ctx = Context::new().with_value::<ClusterName>("kind-e2e".to_owned());
/// assert_eq!(ctx.value::<ClusterName>().map(String::as_str), Some("kind-e2e"));
/// ```
pub trait ContextKey: 'static {
    type Value: Send + Sync + 'static;
}

#[derive(Clone)]
struct Entry {
    key_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
}

/// Immutable runtime context threaded through every environment function
/// and feature step.
///
/// Cloning is cheap. [`Context::with_value`] returns a derived context and
/// leaves the receiver untouched. Every context carries a cancellation
/// token; contexts derived with [`Context::with_cancel`] are cancelled when
/// their parent is.
#[derive(Clone)]
pub struct Context {
    values: Arc<HashMap<TypeId, Entry>>,
    cancel: CancellationToken,
}

impl Context {
    /// A fresh root context with no values and its own cancellation token.
    pub fn new() -> Self {
        Self {
            values: Arc::new(HashMap::new()),
            cancel: CancellationToken::new(),
        }
    }

    /// Derive a context holding `value` under key `K`, replacing any value
    /// previously stored under the same key.
    pub fn with_value<K: ContextKey>(&self, value: K::Value) -> Self {
        let mut values = HashMap::clone(&self.values);
        values.insert(
            TypeId::of::<K>(),
            Entry {
                key_name: type_name::<K>(),
                value: Arc::new(value),
            },
        );
        Self {
            values: Arc::new(values),
            cancel: self.cancel.clone(),
        }
    }

    /// Derive a context without the value stored under `K`.
    pub fn without_value<K: ContextKey>(&self) -> Self {
        if !self.contains::<K>() {
            return self.clone();
        }
        let mut values = HashMap::clone(&self.values);
        values.remove(&TypeId::of::<K>());
        Self {
            values: Arc::new(values),
            cancel: self.cancel.clone(),
        }
    }

    /// Look up the value stored under key `K`.
    pub fn value<K: ContextKey>(&self) -> Option<&K::Value> {
        self.values
            .get(&TypeId::of::<K>())
            .and_then(|entry| entry.value.downcast_ref::<K::Value>())
    }

    /// Whether a value is stored under key `K`.
    pub fn contains<K: ContextKey>(&self) -> bool {
        self.values.contains_key(&TypeId::of::<K>())
    }

    /// Derive a context whose cancellation token is a child of this one.
    ///
    /// Cancelling the returned token cancels the derived context only;
    /// cancelling the parent cancels both.
    pub fn with_cancel(&self) -> (Self, CancellationToken) {
        let child = self.cancel.child_token();
        (
            Self {
                values: Arc::clone(&self.values),
                cancel: child.clone(),
            },
            child,
        )
    }

    /// Cancel this context and every context derived from it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// The token backing this context's cancellation.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Number of values carried.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<&str> = self.values.values().map(|e| e.key_name).collect();
        keys.sort_unstable();
        f.debug_struct("Context")
            .field("keys", &keys)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}
