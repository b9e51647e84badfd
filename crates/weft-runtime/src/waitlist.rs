//! Per-key "absent → pending → resolved" table with waitlists.
//!
//! The first caller for a key [`claim`](Waitlist::claim)s it and receives a
//! [`PendingGuard`]; everyone arriving while it is pending receives a
//! [`Waiter`] parked on that key. Completing the guard caches the value and
//! drains every parked waiter with the same outcome. A failed or abandoned
//! entry goes back to absent so a later request starts over.
//!
//! Guards own an `Arc` of their list, so the work behind a key can move into
//! a detached task and outlive the caller that started it.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::oneshot;

/// Why a parked waiter did not receive a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitError<E> {
    /// The leader completed with an error.
    Failed(E),
    /// The leader went away without completing.
    Abandoned,
    /// The table was cleared while the entry was pending.
    Cleared,
}

type Reply<V, E> = oneshot::Sender<Result<V, WaitError<E>>>;

enum Entry<V, E> {
    /// `led` is false while only subscribers wait and nobody produces.
    Pending { led: bool, waiters: Vec<Reply<V, E>> },
    Resolved(V),
}

struct State<K, V, E> {
    generation: u64,
    entries: HashMap<K, Entry<V, E>>,
}

pub struct Waitlist<K, V, E> {
    state: Mutex<State<K, V, E>>,
}

/// Outcome of [`Waitlist::claim`].
pub enum Claim<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    /// Already resolved.
    Ready(V),
    /// In flight; await the waiter.
    Wait(Waiter<V, E>),
    /// This caller does the work and must complete the guard.
    Lead(PendingGuard<K, V, E>),
}

/// A continuation parked on a pending key.
pub struct Waiter<V, E> {
    rx: oneshot::Receiver<Result<V, WaitError<E>>>,
}

impl<V, E> Waiter<V, E> {
    pub async fn wait(self) -> Result<V, WaitError<E>> {
        self.rx.await.unwrap_or(Err(WaitError::Abandoned))
    }
}

/// Exclusive right to complete one pending key.
///
/// Dropping the guard without completing it returns the key to absent and
/// wakes every waiter with [`WaitError::Abandoned`].
pub struct PendingGuard<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    list: Arc<Waitlist<K, V, E>>,
    key: Option<K>,
    generation: u64,
}

impl<K, V, E> Default for Waitlist<K, V, E> {
    fn default() -> Self {
        Self {
            state: Mutex::new(State {
                generation: 0,
                entries: HashMap::new(),
            }),
        }
    }
}

impl<K, V, E> Waitlist<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State<K, V, E>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn claim(self: &Arc<Self>, key: &K) -> Claim<K, V, E> {
        let mut state = self.lock();
        let generation = state.generation;
        let lead = || {
            Claim::Lead(PendingGuard {
                list: self.clone(),
                key: Some(key.clone()),
                generation,
            })
        };
        match state.entries.get_mut(key) {
            Some(Entry::Resolved(value)) => Claim::Ready(value.clone()),
            Some(Entry::Pending { led: true, waiters }) => {
                let (tx, rx) = oneshot::channel();
                waiters.push(tx);
                Claim::Wait(Waiter { rx })
            }
            // Subscribers are already parked; this caller produces for them.
            Some(Entry::Pending { led, .. }) => {
                *led = true;
                lead()
            }
            None => {
                state.entries.insert(
                    key.clone(),
                    Entry::Pending {
                        led: true,
                        waiters: Vec::new(),
                    },
                );
                lead()
            }
        }
    }

    /// Wait for `key` to be resolved by whoever resolves it, without taking
    /// responsibility for producing it.
    ///
    /// Entries left behind by subscribers that stopped waiting are dropped
    /// here.
    pub fn subscribe(&self, key: &K) -> Waiter<V, E> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.lock();
        sweep_idle(&mut state.entries);
        match state.entries.get_mut(key) {
            Some(Entry::Resolved(value)) => {
                let _ = tx.send(Ok(value.clone()));
            }
            Some(Entry::Pending { waiters, .. }) => waiters.push(tx),
            None => {
                state.entries.insert(
                    key.clone(),
                    Entry::Pending {
                        led: false,
                        waiters: vec![tx],
                    },
                );
            }
        }
        Waiter { rx }
    }

    /// Resolve `key` directly unless it already holds a value.
    ///
    /// Returns the value now cached and whether this call stored it.
    pub fn insert(&self, key: K, value: V) -> (V, bool) {
        let waiters = {
            let mut state = self.lock();
            match state.entries.get(&key) {
                Some(Entry::Resolved(existing)) => return (existing.clone(), false),
                _ => match state.entries.insert(key, Entry::Resolved(value.clone())) {
                    Some(Entry::Pending { waiters, .. }) => waiters,
                    _ => Vec::new(),
                },
            }
        };
        drain(waiters, Ok(value.clone()));
        (value, true)
    }

    pub fn peek(&self, key: &K) -> Option<V> {
        match self.lock().entries.get(key) {
            Some(Entry::Resolved(value)) => Some(value.clone()),
            _ => None,
        }
    }

    pub fn is_pending(&self, key: &K) -> bool {
        matches!(self.lock().entries.get(key), Some(Entry::Pending { .. }))
    }

    /// Number of resolved entries.
    pub fn len(&self) -> usize {
        self.lock()
            .entries
            .values()
            .filter(|e| matches!(e, Entry::Resolved(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn resolved_keys(&self) -> Vec<K> {
        self.lock()
            .entries
            .iter()
            .filter(|(_, e)| matches!(e, Entry::Resolved(_)))
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Forget every entry. Parked waiters fail with [`WaitError::Cleared`]
    /// and guards issued before the clear complete into nothing.
    pub fn clear(&self) -> usize {
        let entries = {
            let mut state = self.lock();
            state.generation += 1;
            std::mem::take(&mut state.entries)
        };
        let count = entries.len();
        for entry in entries.into_values() {
            if let Entry::Pending { waiters, .. } = entry {
                drain(waiters, Err(WaitError::Cleared));
            }
        }
        count
    }

    fn complete(&self, key: &K, generation: u64, outcome: Result<V, WaitError<E>>) {
        let waiters = {
            let mut state = self.lock();
            if state.generation != generation {
                return;
            }
            let waiters = match state.entries.remove(key) {
                Some(Entry::Pending { waiters, .. }) => waiters,
                Some(resolved) => {
                    state.entries.insert(key.clone(), resolved);
                    return;
                }
                None => Vec::new(),
            };
            if let Ok(value) = &outcome {
                state
                    .entries
                    .insert(key.clone(), Entry::Resolved(value.clone()));
            }
            waiters
        };
        drain(waiters, outcome);
    }
}

/// Remove subscriber-only entries whose waiters have all gone away.
fn sweep_idle<K, V, E>(entries: &mut HashMap<K, Entry<V, E>>) {
    entries.retain(|_, entry| match entry {
        Entry::Pending {
            led: false,
            waiters,
        } => {
            waiters.retain(|tx| !tx.is_closed());
            !waiters.is_empty()
        }
        _ => true,
    });
}

fn drain<V: Clone, E: Clone>(mut waiters: Vec<Reply<V, E>>, outcome: Result<V, WaitError<E>>) {
    while let Some(tx) = waiters.pop() {
        let _ = tx.send(outcome.clone());
    }
}

impl<K, V, E> PendingGuard<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    pub fn key(&self) -> Option<&K> {
        self.key.as_ref()
    }

    /// Cache `value` and wake every waiter with it.
    pub fn resolve(mut self, value: V) {
        if let Some(key) = self.key.take() {
            self.list.complete(&key, self.generation, Ok(value));
        }
    }

    /// Return the key to absent and wake every waiter with `error`.
    pub fn fail(mut self, error: E) {
        if let Some(key) = self.key.take() {
            self.list
                .complete(&key, self.generation, Err(WaitError::Failed(error)));
        }
    }
}

impl<K, V, E> Drop for PendingGuard<K, V, E>
where
    K: Eq + Hash + Clone,
    V: Clone,
    E: Clone,
{
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.list
                .complete(&key, self.generation, Err(WaitError::Abandoned));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type List = Waitlist<String, u32, String>;

    fn lead(list: &Arc<List>, key: &str) -> PendingGuard<String, u32, String> {
        match list.claim(&key.to_string()) {
            Claim::Lead(guard) => guard,
            _ => panic!("expected to lead {key}"),
        }
    }

    fn park(list: &Arc<List>, key: &str) -> Waiter<u32, String> {
        match list.claim(&key.to_string()) {
            Claim::Wait(waiter) => waiter,
            _ => panic!("expected to wait on {key}"),
        }
    }

    #[tokio::test]
    async fn waiters_receive_the_resolved_value() {
        let list = Arc::new(List::new());
        let guard = lead(&list, "a");
        let first = park(&list, "a");
        let second = park(&list, "a");
        assert!(list.is_pending(&"a".into()));

        guard.resolve(7);

        assert_eq!(first.wait().await, Ok(7));
        assert_eq!(second.wait().await, Ok(7));
        assert!(matches!(list.claim(&"a".into()), Claim::Ready(7)));
        assert_eq!(list.len(), 1);
    }

    #[tokio::test]
    async fn failure_reaches_every_waiter_and_resets_the_key() {
        let list = Arc::new(List::new());
        let guard = lead(&list, "a");
        let waiter = park(&list, "a");

        guard.fail("boom".into());

        assert_eq!(waiter.wait().await, Err(WaitError::Failed("boom".into())));
        assert!(matches!(list.claim(&"a".into()), Claim::Lead(_)));
    }

    #[tokio::test]
    async fn dropped_guard_abandons_waiters() {
        let list = Arc::new(List::new());
        let waiter = {
            let _guard = lead(&list, "a");
            park(&list, "a")
        };
        assert_eq!(waiter.wait().await, Err(WaitError::Abandoned));
        assert!(!list.is_pending(&"a".into()));
    }

    #[tokio::test]
    async fn clear_fails_waiters_and_ignores_stale_guards() {
        let list = Arc::new(List::new());
        let guard = lead(&list, "a");
        let waiter = park(&list, "a");

        list.clear();
        assert_eq!(waiter.wait().await, Err(WaitError::Cleared));

        guard.resolve(1);
        assert!(list.peek(&"a".into()).is_none());
        assert!(list.is_empty());
    }

    #[tokio::test]
    async fn insert_is_idempotent_and_wakes_subscribers() {
        let list = Arc::new(List::new());
        let subscriber = list.subscribe(&"a".into());

        assert_eq!(list.insert("a".into(), 1), (1, true));
        assert_eq!(list.insert("a".into(), 2), (1, false));
        assert_eq!(subscriber.wait().await, Ok(1));
        assert_eq!(list.subscribe(&"a".into()).wait().await, Ok(1));
        assert_eq!(list.resolved_keys(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn claim_after_subscribe_leads_and_serves_the_subscriber() {
        let list = Arc::new(List::new());
        let subscriber = list.subscribe(&"a".into());

        let guard = lead(&list, "a");
        let waiter = park(&list, "a");
        guard.resolve(3);

        assert_eq!(subscriber.wait().await, Ok(3));
        assert_eq!(waiter.wait().await, Ok(3));
    }

    #[tokio::test]
    async fn subscriptions_nobody_waits_on_are_swept() {
        let list = Arc::new(List::new());
        drop(list.subscribe(&"ghost".into()));
        assert!(list.is_pending(&"ghost".into()));

        let _other = list.subscribe(&"other".into());

        assert!(!list.is_pending(&"ghost".into()));
        assert!(list.is_pending(&"other".into()));
    }

    #[tokio::test]
    async fn guard_moves_into_a_spawned_task() {
        let list = Arc::new(List::new());
        let guard = lead(&list, "a");
        let waiter = park(&list, "a");

        tokio::spawn(async move { guard.resolve(9) }).await.unwrap();

        assert_eq!(waiter.wait().await, Ok(9));
    }
}
