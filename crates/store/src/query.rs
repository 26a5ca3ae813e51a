//! Live queries over the store.
//!
//! A [`ReactiveQuery`] is a filtered, sorted view of one entity type that
//! recomputes itself whenever a committed write touches that type, and
//! publishes to its subscribers only when the result actually changed.

use kura_model::models::{Entity, EntityKey, EntityKind, Record};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::watch;

pub(crate) type Snapshot = HashMap<EntityKey, Entity>;
type Predicate<T> = Box<dyn Fn(&T) -> bool + Send + Sync>;
type Comparator<T> = Box<dyn Fn(&T, &T) -> Ordering + Send + Sync>;

/// Anything the store notifies after a committed write.
pub(crate) trait Observer: Send + Sync {
    fn kinds(&self) -> &'static [EntityKind];
    fn refresh(&self, snapshot: &Snapshot);
}

pub(crate) struct QueryCore<T: Record> {
    predicate: Predicate<T>,
    sort: Comparator<T>,
    sender: watch::Sender<Arc<[T]>>,
}
impl<T: Record> QueryCore<T> {
    pub(crate) fn new(
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        sort: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
        snapshot: &Snapshot,
    ) -> Self {
        let predicate: Predicate<T> = Box::new(predicate);
        let sort: Comparator<T> = Box::new(sort);
        let items = compute(&predicate, &sort, snapshot);
        Self {
            predicate,
            sort,
            sender: watch::Sender::new(items),
        }
    }
}

fn compute<T: Record>(predicate: &Predicate<T>, sort: &Comparator<T>, snapshot: &Snapshot) -> Arc<[T]> {
    let mut items: Vec<T> = snapshot
        .values()
        .filter_map(T::from_entity)
        .filter(|item| predicate(item))
        .cloned()
        .collect();
    // Ties are broken by key so the order never depends on hash order.
    items.sort_by(|a, b| sort(a, b).then_with(|| a.key().cmp(&b.key())));
    Arc::from(items)
}
impl<T: Record> Observer for QueryCore<T> {
    fn kinds(&self) -> &'static [EntityKind] {
        T::KINDS
    }

    fn refresh(&self, snapshot: &Snapshot) {
        let items = compute(&self.predicate, &self.sort, snapshot);
        self.sender.send_if_modified(|current| {
            if current[..] == items[..] {
                return false;
            }
            *current = items;
            true
        });
    }
}

/// Unregisters a query from the store it was created from.
pub(crate) trait Registry: Send + Sync {
    fn unregister(&self, observer: &Weak<dyn Observer>);
}

/// A live, filtered and sorted view over one entity type.
///
/// Reading never touches the database: [`current_items`](Self::current_items)
/// returns the latest computed snapshot. Dropping the query unregisters it
/// from the store and closes every [`Subscription`].
pub struct ReactiveQuery<T: Record> {
    core: Arc<QueryCore<T>>,
    registry: Weak<dyn Registry>,
}
impl<T: Record> ReactiveQuery<T> {
    pub(crate) fn new(core: Arc<QueryCore<T>>, registry: Weak<dyn Registry>) -> Self {
        Self { core, registry }
    }

    /// The current result set.
    pub fn current_items(&self) -> Arc<[T]> {
        self.core.sender.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.core.sender.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.core.sender.borrow().is_empty()
    }

    /// Subscribes to changes of the result set.
    ///
    /// The first call to [`Subscription::changed`] always resolves
    /// immediately with the current items, even if there are none.
    pub fn subscribe(&self) -> Subscription<T> {
        let mut receiver = self.core.sender.subscribe();
        receiver.mark_changed();
        Subscription { receiver }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.core.sender.receiver_count()
    }
}
impl<T: Record> Drop for ReactiveQuery<T> {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            let observer: Weak<dyn Observer> = Arc::downgrade(&self.core) as Weak<dyn Observer>;
            registry.unregister(&observer);
        }
    }
}

/// Change notifications of a [`ReactiveQuery`].
pub struct Subscription<T: Record> {
    receiver: watch::Receiver<Arc<[T]>>,
}
impl<T: Record> Subscription<T> {
    /// Waits for the next change and returns the new result set, or `None`
    /// once the query has been dropped.
    ///
    /// Intermediate states are coalesced: a slow subscriber only ever sees
    /// the latest result set.
    pub async fn changed(&mut self) -> Option<Arc<[T]>> {
        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Stops receiving notifications.
    pub fn unsubscribe(self) {
        drop(self);
    }
}
