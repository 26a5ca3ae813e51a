use super::{Category, EntityKey, EntityKind, LibraryEntry, Media, MediaKind, User};
use crate::error::{ErrorKind, Result};

/// Any record fetched from the remote library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entity {
    LibraryEntry(LibraryEntry),
    Media(Media),
    User(User),
}
impl Entity {
    pub fn key(&self) -> EntityKey {
        match self {
            Entity::LibraryEntry(entry) => entry.key(),
            Entity::Media(media) => media.key(),
            Entity::User(user) => user.key(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.key().kind
    }

    pub fn id(&self) -> i64 {
        self.key().id
    }

    /// Owner of the entity, for the entity kinds that have one.
    pub fn owner_id(&self) -> Option<i64> {
        match self {
            Entity::LibraryEntry(entry) => Some(entry.user_id),
            Entity::Media(_) | Entity::User(_) => None,
        }
    }

    pub fn media_kind(&self) -> Option<MediaKind> {
        match self {
            Entity::LibraryEntry(entry) => Some(entry.media_kind),
            Entity::Media(media) => Some(media.kind),
            Entity::User(_) => None,
        }
    }

    pub fn category(&self) -> Option<Category> {
        match self {
            Entity::LibraryEntry(entry) => Some(entry.status),
            Entity::Media(_) | Entity::User(_) => None,
        }
    }

    /// Checks that the entity can be stored: its own id, and the ids of
    /// anything it references, must be positive.
    ///
    /// Ids are never `0` or negative on the remote side, so those values
    /// only show up when a record was built from incomplete data.
    pub fn validate(&self) -> Result<()> {
        if self.id() <= 0 {
            exn::bail!(ErrorKind::MissingField("id"));
        }
        if let Entity::LibraryEntry(entry) = self {
            if entry.user_id <= 0 {
                exn::bail!(ErrorKind::MissingField("user_id"));
            }
            if entry.media_id <= 0 {
                exn::bail!(ErrorKind::MissingField("media_id"));
            }
        }
        Ok(())
    }
}
impl From<LibraryEntry> for Entity {
    fn from(entry: LibraryEntry) -> Self {
        Entity::LibraryEntry(entry)
    }
}
impl From<Media> for Entity {
    fn from(media: Media) -> Self {
        Entity::Media(media)
    }
}
impl From<User> for Entity {
    fn from(user: User) -> Self {
        Entity::User(user)
    }
}

/// A concrete entity type that can be looked up and queried in a store.
pub trait Record: Clone + PartialEq + Send + Sync + 'static {
    /// Entity kinds values of this type are stored under.
    const KINDS: &'static [EntityKind];

    fn key(&self) -> EntityKey;

    /// Borrow the concrete value out of an [`Entity`], if it is one.
    fn from_entity(entity: &Entity) -> Option<&Self>;
}
impl Record for LibraryEntry {
    const KINDS: &'static [EntityKind] = &[EntityKind::LibraryEntry];

    fn key(&self) -> EntityKey {
        LibraryEntry::key(self)
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::LibraryEntry(entry) => Some(entry),
            _ => None,
        }
    }
}
impl Record for Media {
    const KINDS: &'static [EntityKind] = &[EntityKind::Anime, EntityKind::Manga];

    fn key(&self) -> EntityKey {
        Media::key(self)
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::Media(media) => Some(media),
            _ => None,
        }
    }
}
impl Record for User {
    const KINDS: &'static [EntityKind] = &[EntityKind::User];

    fn key(&self) -> EntityKey {
        User::key(self)
    }

    fn from_entity(entity: &Entity) -> Option<&Self> {
        match entity {
            Entity::User(user) => Some(user),
            _ => None,
        }
    }
}
