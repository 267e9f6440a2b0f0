//! Process-wide shared state available to handlers.
//!
//! - [`KeyedStore`]: a map with single-writer-per-key discipline. Writers to
//!   the same key are serialized; different keys proceed in parallel.
//! - [`Services`]: type-keyed map of shared service objects injected at
//!   bootstrap and handed to every unit factory.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

// =============================================================================
// KeyedStore
// =============================================================================

type Slot<V> = Arc<AsyncMutex<Option<V>>>;

/// A keyed map whose entries are each guarded by their own async mutex.
pub struct KeyedStore<K, V> {
    slots: Mutex<HashMap<K, Slot<V>>>,
}

impl<K, V> Default for KeyedStore<K, V> {
    fn default() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> KeyedStore<K, V>
where
    K: Eq + Hash + Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, key: &K) -> Slot<V> {
        let mut slots = self.slots.lock();
        Arc::clone(
            slots
                .entry(key.clone())
                .or_insert_with(|| Arc::new(AsyncMutex::new(None))),
        )
    }

    /// Acquires exclusive access to `key`'s value.
    ///
    /// The guard holds `None` when the key has no value. Other keys remain
    /// available while the guard is held.
    pub async fn lock(&self, key: K) -> OwnedMutexGuard<Option<V>> {
        self.slot(&key).lock_owned().await
    }

    pub async fn get(&self, key: &K) -> Option<V>
    where
        V: Clone,
    {
        let slot = self.slots.lock().get(key).cloned()?;
        let value = slot.lock().await.clone();
        value
    }

    /// Stores `value`, returning the previous one.
    pub async fn insert(&self, key: K, value: V) -> Option<V> {
        self.lock(key).await.replace(value)
    }

    /// Removes and returns the value under `key`.
    pub async fn remove(&self, key: &K) -> Option<V> {
        let slot = self.slots.lock().get(key).cloned()?;
        let value = slot.lock().await.take();

        // Drop the empty slot unless another task is holding or waiting on it.
        let mut slots = self.slots.lock();
        let idle = slots.get(key).is_some_and(|current| {
            Arc::ptr_eq(current, &slot)
                && Arc::strong_count(&slot) == 2
                && current.try_lock().is_ok_and(|guard| guard.is_none())
        });
        if idle {
            slots.remove(key);
        }
        value
    }

    /// Runs `f` with exclusive access to `key`'s value.
    pub async fn update<R>(&self, key: K, f: impl FnOnce(&mut Option<V>) -> R) -> R {
        let mut guard = self.lock(key).await;
        f(&mut guard)
    }

    /// Number of keys currently holding a value.
    pub async fn len(&self) -> usize {
        let slots: Vec<Slot<V>> = self.slots.lock().values().cloned().collect();
        let mut count = 0;
        for slot in slots {
            if slot.lock().await.is_some() {
                count += 1;
            }
        }
        count
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl<K, V> fmt::Debug for KeyedStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedStore")
            .field("slots", &self.slots.lock().len())
            .finish()
    }
}

// =============================================================================
// Services
// =============================================================================

/// Type-keyed map of shared services.
///
/// Values are stored as `Arc<T>`, so trait objects work too:
/// `services.insert::<dyn Clock>(Arc::new(SystemClock))`.
#[derive(Clone, Default)]
pub struct Services {
    map: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: ?Sized + Send + Sync + 'static>(&mut self, service: Arc<T>) {
        self.map.insert(TypeId::of::<T>(), Arc::new(service));
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with<T: ?Sized + Send + Sync + 'static>(mut self, service: Arc<T>) -> Self {
        self.insert(service);
        self
    }

    pub fn get<T: ?Sized + Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|arc| arc.downcast_ref::<Arc<T>>().map(Arc::clone))
    }

    pub fn contains<T: ?Sized + 'static>(&self) -> bool {
        self.map.contains_key(&TypeId::of::<T>())
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("len", &self.map.len())
            .finish()
    }
}
