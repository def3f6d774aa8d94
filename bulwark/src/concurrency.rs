use std::future::Future;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::error::CallError;
use crate::panic::catch_panic;

type Shared<V, E> = Result<V, CallError<E>>;

/// Registration of a call that is currently running for a key.
struct PendingCall<V, E> {
    generation: u64,
    sender: broadcast::Sender<Shared<V, E>>,
}

/// Role of a caller after registering interest in a key.
enum Role<V, E> {
    /// Run the call and publish its result.
    Leader {
        generation: u64,
        sender: broadcast::Sender<Shared<V, E>>,
    },
    /// Wait for the leader's result.
    Waiter(broadcast::Receiver<Shared<V, E>>),
}

/// Coalesces concurrent calls for the same key.
///
/// While a call for a key is in flight, later callers for that key do not run
/// their own future: they wait for the running one and receive a clone of its
/// result (value or error). Once the call finishes the registration is removed
/// and the next caller starts a fresh call.
///
/// ```
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use bulwark::concurrency::KeyedCall;
///
/// let calls: KeyedCall<String, u64, String> = KeyedCall::new();
/// let value = calls
///     .call("user:1".to_owned(), async { Ok::<_, String>(42) })
///     .await;
/// assert_eq!(value, Ok(42));
/// # }
/// ```
pub struct KeyedCall<K, V, E>
where
    K: Eq + Hash,
{
    pending: DashMap<K, PendingCall<V, E>>,
    generation: AtomicU64,
}

impl<K, V, E> KeyedCall<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    /// Creates an empty `KeyedCall`.
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Runs `future` for `key` unless a call for `key` is already in flight,
    /// in which case the result of that call is awaited and returned instead.
    ///
    /// A panic inside `future` is caught here and reported to every caller as
    /// [`CallError::Panicked`]. If the leading caller is dropped before it
    /// finishes, waiters receive [`CallError::Abandoned`]. The registration is
    /// removed on every one of these paths.
    pub async fn call<F>(&self, key: K, future: F) -> Result<V, CallError<E>>
    where
        F: Future<Output = Result<V, E>>,
    {
        let (generation, sender) = match self.register(&key) {
            Role::Leader { generation, sender } => (generation, sender),
            Role::Waiter(mut receiver) => {
                debug!(?key, "awaiting in-flight call");
                return match receiver.recv().await {
                    Ok(shared) => shared,
                    Err(_) => Err(CallError::Abandoned),
                };
            }
        };

        let cleanup = Cleanup {
            pending: &self.pending,
            key: &key,
            generation,
        };

        let result = match catch_panic(future).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(error)) => Err(CallError::Failed(error)),
            Err(message) => {
                error!(?key, panic = %message, "keyed call panicked");
                Err(CallError::Panicked(message))
            }
        };

        // Deregister before publishing: anyone arriving after this point
        // starts a new call instead of subscribing to a finished one.
        drop(cleanup);
        let _ = sender.send(result.clone());
        result
    }

    /// Drops the registration for `key`, if any.
    ///
    /// The next [`call`](Self::call) for `key` runs fresh even if the previous
    /// call is still running. Callers already waiting on the previous call
    /// still receive its result.
    pub fn forget(&self, key: &K) -> bool {
        self.pending.remove(key).is_some()
    }

    /// Returns `true` if a call for `key` is in flight.
    pub fn in_flight(&self, key: &K) -> bool {
        self.pending.contains_key(key)
    }

    /// Returns the number of keys with a call in flight.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` if no call is in flight.
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn register(&self, key: &K) -> Role<V, E> {
        match self.pending.entry(key.clone()) {
            Entry::Occupied(entry) => Role::Waiter(entry.get().sender.subscribe()),
            Entry::Vacant(entry) => {
                let generation = self.generation.fetch_add(1, Ordering::Relaxed);
                let (sender, _) = broadcast::channel(1);
                entry.insert(PendingCall {
                    generation,
                    sender: sender.clone(),
                });
                Role::Leader { generation, sender }
            }
        }
    }
}

impl<K, V, E> Default for KeyedCall<K, V, E>
where
    K: Eq + Hash + Clone + std::fmt::Debug,
    V: Clone,
    E: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V, E> std::fmt::Debug for KeyedCall<K, V, E>
where
    K: Eq + Hash,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyedCall")
            .field("in_flight", &self.pending.len())
            .finish()
    }
}

/// Removes the leader's registration when dropped.
///
/// Only the registration with the matching generation is removed, so a
/// leader that was forgotten cannot evict the call that replaced it.
struct Cleanup<'a, K, V, E>
where
    K: Eq + Hash,
{
    pending: &'a DashMap<K, PendingCall<V, E>>,
    key: &'a K,
    generation: u64,
}

impl<K, V, E> Drop for Cleanup<'_, K, V, E>
where
    K: Eq + Hash,
{
    fn drop(&mut self) {
        self.pending
            .remove_if(self.key, |_, call| call.generation == self.generation);
    }
}
