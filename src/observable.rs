//! Observable collections and the cross-executor mirroring adapter
//! (spec §5): the backend owns its collections outright (no lock, thanks to
//! affinity), but anything reaching across threads — the HTTP layer, a UI —
//! must go through a mirror. Each delta is snapshotted at source time so the
//! backend can keep mutating its collection without disturbing a consumer
//! that hasn't caught up yet.

use std::collections::HashMap;
use std::hash::Hash;

use tokio::sync::mpsc;

/// One snapshotted change to an observable keyed collection.
#[derive(Debug, Clone)]
pub enum Change<K, V> {
    Inserted { key: K, value: V },
    Removed { key: K, value: V },
    Updated { key: K, old: V, new: V },
}

/// A keyed collection that notifies every registered mirror of each change,
/// by value, at the moment the change happens.
pub struct ObservableMap<K, V> {
    inner: HashMap<K, V>,
    mirrors: Vec<mpsc::UnboundedSender<Change<K, V>>>,
}

impl<K, V> ObservableMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn new() -> Self {
        ObservableMap { inner: HashMap::new(), mirrors: Vec::new() }
    }

    fn notify(&mut self, change: Change<K, V>) {
        self.mirrors.retain(|tx| tx.send(change.clone()).is_ok());
    }

    pub fn insert(&mut self, key: K, value: V) {
        let change = match self.inner.insert(key.clone(), value.clone()) {
            Some(old) => Change::Updated { key, old, new: value },
            None => Change::Inserted { key, value },
        };
        self.notify(change);
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        let removed = self.inner.remove(key)?;
        self.notify(Change::Removed { key: key.clone(), value: removed.clone() });
        Some(removed)
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Snapshot the current contents and register a new mirror channel.
    /// Returns the initial snapshot plus a receiver of every change from
    /// this point on; the caller drives the receiver on whichever executor
    /// it belongs to.
    pub fn mirror(&mut self) -> (Vec<(K, V)>, mpsc::UnboundedReceiver<Change<K, V>>) {
        let snapshot = self.inner.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        let (tx, rx) = mpsc::unbounded_channel();
        self.mirrors.push(tx);
        (snapshot, rx)
    }
}

impl<K, V> Default for ObservableMap<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

/// A thread-confined view of an `ObservableMap`, reflecting changes
/// asynchronously over its own executor. Built by replaying the initial
/// snapshot, then applying each `Change` as it arrives; the receiving
/// executor is never the source's, so the mirror is always a distinct
/// collection the consumer can read without synchronizing with the source.
pub struct Mirror<K, V> {
    inner: HashMap<K, V>,
    rx: mpsc::UnboundedReceiver<Change<K, V>>,
}

impl<K, V> Mirror<K, V>
where
    K: Clone + Eq + Hash,
    V: Clone,
{
    pub fn from_snapshot(snapshot: Vec<(K, V)>, rx: mpsc::UnboundedReceiver<Change<K, V>>) -> Self {
        Mirror { inner: snapshot.into_iter().collect(), rx }
    }

    /// Apply the next pending change, if any, without blocking. Returns
    /// `None` once the source has dropped (no more changes will ever
    /// arrive) and there is nothing queued.
    pub fn try_apply_next(&mut self) -> Option<Change<K, V>> {
        let change = self.rx.try_recv().ok()?;
        self.apply(&change);
        Some(change)
    }

    /// Await and apply the next change, blocking until one arrives or the
    /// source is gone.
    pub async fn apply_next(&mut self) -> Option<Change<K, V>> {
        let change = self.rx.recv().await?;
        self.apply(&change);
        Some(change)
    }

    fn apply(&mut self, change: &Change<K, V>) {
        match change {
            Change::Inserted { key, value } | Change::Updated { key, new: value, .. } => {
                self.inner.insert(key.clone(), value.clone());
            }
            Change::Removed { key, .. } => {
                self.inner.remove(key);
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.inner.get(key)
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.inner.values()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mirror_replays_snapshot_then_tracks_changes() {
        let mut source: ObservableMap<String, u64> = ObservableMap::new();
        source.insert("a".to_string(), 1);
        let (snapshot, rx) = source.mirror();
        let mut mirror = Mirror::from_snapshot(snapshot, rx);
        assert_eq!(mirror.get(&"a".to_string()), Some(&1));

        source.insert("b".to_string(), 2);
        let change = mirror.apply_next().await.unwrap();
        assert!(matches!(change, Change::Inserted { .. }));
        assert_eq!(mirror.get(&"b".to_string()), Some(&2));

        source.remove(&"a".to_string());
        mirror.apply_next().await.unwrap();
        assert_eq!(mirror.get(&"a".to_string()), None);
    }
}
