use super::{Category, EntityKey, EntityKind, MediaKind};
use time::UtcDateTime;

/// One item in a user's library.
///
/// The media and the owning user are *referenced*, never embedded: the store
/// owns the one canonical [`Media`](super::Media) and [`User`](super::User)
/// instance, and entries are resolved against it by key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryEntry {
    pub id: i64,
    /// Id of the [`User`](super::User) who owns this entry.
    pub user_id: i64,
    /// Id of the referenced media, unique within `media_kind`.
    pub media_id: i64,
    pub media_kind: MediaKind,
    pub status: Category,
    /// Episodes watched or chapters read.
    pub progress: u32,
    pub reconsume_count: u32,
    /// Rating on a 2–20 scale, if the user rated the media.
    pub rating: Option<u8>,
    pub notes: Option<String>,
    pub private: bool,
    pub updated_at: UtcDateTime,
}
impl LibraryEntry {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(EntityKind::LibraryEntry, self.id)
    }

    /// Key of the referenced media.
    pub fn media_key(&self) -> EntityKey {
        EntityKey::new(self.media_kind.entity_kind(), self.media_id)
    }

    /// Returns `true` if the entry belongs to the given library partition.
    pub fn belongs_to(&self, owner_id: i64, media_kind: MediaKind, status: Category) -> bool {
        self.user_id == owner_id && self.media_kind == media_kind && self.status == status
    }
}
