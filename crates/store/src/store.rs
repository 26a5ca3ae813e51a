//! The entity store.
//!
//! Every entity lives exactly once in the store's identity map, keyed by
//! [`EntityKey`]. The map mirrors the SQLite tables: it is loaded from them on
//! [`open`](EntityStore::open), and every write goes to the database first (in
//! one transaction per batch) and only then into the map. Readers therefore
//! never see a half-merged batch, and never wait on I/O.

use crate::Database;
use crate::error::{ErrorKind, Result};
use crate::models::{EntryRow, MediaRow, UserRow};
use crate::query::{Observer, QueryCore, ReactiveQuery, Registry, Snapshot};
use exn::ResultExt;
use kura_model::error::ErrorKind as ModelErrorKind;
use kura_model::models::{Category, Entity, EntityKey, EntityKind, LibraryEntry, Media, MediaKind, Record};
use sqlx::{Sqlite, SqlitePool, Transaction};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use tracing::instrument;

/// Outcome of a batch upsert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpsertReport {
    /// Entities that were stored (whether or not they differed from the
    /// stored version).
    pub accepted: usize,
    /// Entities that actually changed the store.
    pub changed: usize,
    /// Entities that failed validation and were left out of the batch.
    pub rejected: Vec<(EntityKey, ModelErrorKind)>,
}

/// Narrows [`EntityStore::delete_missing`] to part of a library.
///
/// Every field is optional; a set field only matches entities that carry
/// that attribute, so media and users are never matched by an owner or
/// category scope.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Scope {
    pub owner_id: Option<i64>,
    pub media_kind: Option<MediaKind>,
    pub category: Option<Category>,
}
impl Scope {
    /// One category of one user's library.
    pub fn library(owner_id: i64, media_kind: MediaKind, category: Category) -> Self {
        Self {
            owner_id: Some(owner_id),
            media_kind: Some(media_kind),
            category: Some(category),
        }
    }

    fn contains(&self, entity: &Entity) -> bool {
        fn matches<V: PartialEq>(wanted: Option<V>, actual: Option<V>) -> bool {
            wanted.is_none_or(|wanted| actual.is_some_and(|actual| actual == wanted))
        }
        matches(self.owner_id, entity.owner_id())
            && matches(self.media_kind, entity.media_kind())
            && matches(self.category, entity.category())
    }
}

struct Inner {
    pool: SqlitePool,
    state: RwLock<Snapshot>,
    /// Serializes writers, so batches are committed and applied in order.
    writer: tokio::sync::Mutex<()>,
    observers: Mutex<Vec<Weak<dyn Observer>>>,
}
impl Registry for Inner {
    fn unregister(&self, observer: &Weak<dyn Observer>) {
        let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.retain(|o| !Weak::ptr_eq(o, observer) && o.strong_count() > 0);
    }
}
impl Inner {
    /// Applies committed changes to the identity map, then notifies every
    /// live query watching one of the touched kinds.
    ///
    /// Must be called with the writer lock held.
    fn apply(&self, upserted: Vec<Entity>, deleted: Vec<EntityKey>) {
        let touched: HashSet<EntityKind> =
            upserted.iter().map(Entity::kind).chain(deleted.iter().map(|key| key.kind)).collect();
        if touched.is_empty() {
            return;
        }
        {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            for key in deleted {
                state.remove(&key);
            }
            for entity in upserted {
                state.insert(entity.key(), entity);
            }
        }
        // Never hold the observer list and the state at the same time.
        let observers: Vec<Arc<dyn Observer>> = {
            let mut observers = self.observers.lock().unwrap_or_else(PoisonError::into_inner);
            observers.retain(|o| o.strong_count() > 0);
            observers.iter().filter_map(Weak::upgrade).collect()
        };
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        for observer in observers.iter().filter(|o| o.kinds().iter().any(|k| touched.contains(k))) {
            observer.refresh(&state);
        }
    }
}

/// Single source of truth for every entity synced from the remote.
///
/// Cloning is cheap; clones share the same identity map and database.
///
/// # Examples
///
/// ```
/// use kura_model::models::User;
/// use kura_store::{Database, EntityStore};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let db = Database::connect_in_memory().await.unwrap();
/// let store = EntityStore::open(&db).await.unwrap();
/// let users = store.query::<User>(|_| true, |a, b| a.name.cmp(&b.name));
/// assert!(users.is_empty());
///
/// let report = store.upsert(vec![User { id: 1, name: "Maka".to_string(), about: None }.into()]).await.unwrap();
/// assert_eq!(report.changed, 1);
/// assert_eq!(users.current_items()[0].name, "Maka");
/// # }
/// ```
#[derive(Clone)]
pub struct EntityStore {
    inner: Arc<Inner>,
}
impl EntityStore {
    /// Opens the store, loading every persisted entity into memory.
    #[instrument(level = "debug", skip_all)]
    pub async fn open(db: &Database) -> Result<Self> {
        let pool = db.pool().clone();
        let mut state = Snapshot::new();
        let entries: Vec<EntryRow> = sqlx::query_as(include_str!("../queries/list_entries.sql"))
            .fetch_all(&pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in entries {
            let entry = LibraryEntry::try_from(row)?;
            state.insert(entry.key(), entry.into());
        }
        let media: Vec<MediaRow> = sqlx::query_as(include_str!("../queries/list_media.sql"))
            .fetch_all(&pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in media {
            let media = Media::try_from(row)?;
            state.insert(media.key(), media.into());
        }
        let users: Vec<UserRow> = sqlx::query_as(include_str!("../queries/list_users.sql"))
            .fetch_all(&pool)
            .await
            .or_raise(|| ErrorKind::Database)?;
        for row in users {
            let user = kura_model::models::User::from(row);
            state.insert(user.key(), user.into());
        }
        tracing::debug!(entities = state.len(), "loaded entity store");
        Ok(Self {
            inner: Arc::new(Inner {
                pool,
                state: RwLock::new(state),
                writer: tokio::sync::Mutex::new(()),
                observers: Mutex::new(Vec::new()),
            }),
        })
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Inserts or replaces a batch of entities.
    ///
    /// Invalid entities are left out and listed in the report; the rest of
    /// the batch is committed in a single transaction and becomes visible to
    /// readers all at once. If the transaction fails, nothing is applied.
    #[instrument(level = "debug", skip_all, fields(batch = entities.len()))]
    pub async fn upsert(&self, entities: Vec<Entity>) -> Result<UpsertReport> {
        let mut report = UpsertReport::default();
        let mut valid = Vec::with_capacity(entities.len());
        for entity in entities {
            match entity.validate() {
                Ok(()) => valid.push(entity),
                Err(err) => report.rejected.push((entity.key(), (*err).clone())),
            }
        }
        report.accepted = valid.len();

        let _writer = self.inner.writer.lock().await;
        // Later duplicates within a batch win, like they would in SQL.
        let mut batch: HashMap<EntityKey, Entity> = HashMap::with_capacity(valid.len());
        for entity in valid {
            batch.insert(entity.key(), entity);
        }
        let changed: Vec<Entity> = {
            let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
            batch.into_values().filter(|entity| state.get(&entity.key()) != Some(entity)).collect()
        };
        report.changed = changed.len();
        if changed.is_empty() {
            return Ok(report);
        }

        let mut tx = self.inner.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for entity in &changed {
            write_entity(&mut tx, entity).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        self.inner.apply(changed, Vec::new());
        Ok(report)
    }

    /// Deletes every entity of type `T` inside `scope` whose id is not in
    /// `keep`, returning how many were deleted.
    ///
    /// Used after a full fetch of a category, to drop entries that no longer
    /// exist remotely. Atomic and notifying exactly like [`upsert`](Self::upsert).
    #[instrument(level = "debug", skip_all, fields(?scope))]
    pub async fn delete_missing<T: Record>(&self, keep: &HashSet<i64>, scope: Scope) -> Result<usize> {
        let _writer = self.inner.writer.lock().await;
        let doomed: BTreeSet<EntityKey> = {
            let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
            state
                .values()
                .filter(|entity| T::from_entity(entity).is_some())
                .filter(|entity| scope.contains(entity) && !keep.contains(&entity.id()))
                .map(Entity::key)
                .collect()
        };
        if doomed.is_empty() {
            return Ok(0);
        }
        let mut tx = self.inner.pool.begin().await.or_raise(|| ErrorKind::Database)?;
        for key in &doomed {
            delete_entity(&mut tx, key).await?;
        }
        tx.commit().await.or_raise(|| ErrorKind::Database)?;
        let deleted = doomed.len();
        self.inner.apply(Vec::new(), doomed.into_iter().collect());
        tracing::debug!(deleted, "deleted missing entities");
        Ok(deleted)
    }

    // =========================================================================
    // Reads
    // =========================================================================

    /// Resolves a reference to a stored entity.
    pub fn get<T: Record>(&self, key: EntityKey) -> Option<T> {
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        state.get(&key).and_then(T::from_entity).cloned()
    }

    /// Resolves a media reference (e.g. the media of a library entry).
    pub fn get_media(&self, kind: MediaKind, id: i64) -> Option<Media> {
        self.get(EntityKey::new(kind.entity_kind(), id))
    }

    /// Number of stored entities, across all kinds.
    pub fn len(&self) -> usize {
        self.inner.state.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Creates a live query over every `T` matching `predicate`, ordered by
    /// `sort` (ties broken by key).
    ///
    /// The query is computed immediately from memory and recomputed after
    /// every committed write touching `T`.
    pub fn query<T: Record>(
        &self,
        predicate: impl Fn(&T) -> bool + Send + Sync + 'static,
        sort: impl Fn(&T, &T) -> Ordering + Send + Sync + 'static,
    ) -> ReactiveQuery<T> {
        // Register while still holding the read lock: a writer can't slip a
        // batch in between the initial computation and registration.
        let state = self.inner.state.read().unwrap_or_else(PoisonError::into_inner);
        let core = Arc::new(QueryCore::new(predicate, sort, &state));
        let observer: Arc<dyn Observer> = core.clone();
        self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner).push(Arc::downgrade(&observer));
        drop(state);
        let registry: Arc<dyn Registry> = self.inner.clone();
        ReactiveQuery::new(core, Arc::downgrade(&registry))
    }

    /// One category of one user's library, most recently updated first.
    pub fn library(&self, owner_id: i64, media_kind: MediaKind, category: Category) -> ReactiveQuery<LibraryEntry> {
        self.query(
            move |entry: &LibraryEntry| entry.belongs_to(owner_id, media_kind, category),
            |a, b| b.updated_at.cmp(&a.updated_at),
        )
    }

    /// Number of queries currently registered with the store.
    pub fn live_queries(&self) -> usize {
        let observers = self.inner.observers.lock().unwrap_or_else(PoisonError::into_inner);
        observers.iter().filter(|o| o.strong_count() > 0).count()
    }
}

async fn write_entity(tx: &mut Transaction<'_, Sqlite>, entity: &Entity) -> Result<()> {
    match entity {
        Entity::LibraryEntry(entry) => {
            let row = EntryRow::from(entry);
            sqlx::query(include_str!("../queries/upsert_entry.sql"))
                .bind(row.id)
                .bind(row.user_id)
                .bind(row.media_kind)
                .bind(row.media_id)
                .bind(row.status)
                .bind(row.progress)
                .bind(row.reconsume_count)
                .bind(row.rating)
                .bind(row.notes)
                .bind(row.private)
                .bind(row.updated_at)
                .execute(&mut **tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        },
        Entity::Media(media) => {
            let row = MediaRow::from(media);
            sqlx::query(include_str!("../queries/upsert_media.sql"))
                .bind(row.kind)
                .bind(row.id)
                .bind(row.slug)
                .bind(row.title)
                .bind(row.unit_count)
                .bind(row.subtype)
                .bind(row.updated_at)
                .execute(&mut **tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        },
        Entity::User(user) => {
            let row = UserRow::from(user);
            sqlx::query(include_str!("../queries/upsert_user.sql"))
                .bind(row.id)
                .bind(row.name)
                .bind(row.about)
                .execute(&mut **tx)
                .await
                .or_raise(|| ErrorKind::Database)?;
        },
    }
    Ok(())
}

async fn delete_entity(tx: &mut Transaction<'_, Sqlite>, key: &EntityKey) -> Result<()> {
    let query = match key.kind {
        EntityKind::LibraryEntry => sqlx::query(include_str!("../queries/delete_entry.sql")).bind(key.id),
        EntityKind::Anime => sqlx::query(include_str!("../queries/delete_media.sql"))
            .bind(MediaKind::Anime.as_str())
            .bind(key.id),
        EntityKind::Manga => sqlx::query(include_str!("../queries/delete_media.sql"))
            .bind(MediaKind::Manga.as_str())
            .bind(key.id),
        EntityKind::User => sqlx::query(include_str!("../queries/delete_user.sql")).bind(key.id),
    };
    query.execute(&mut **tx).await.or_raise(|| ErrorKind::Database)?;
    Ok(())
}
