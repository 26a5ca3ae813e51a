use super::{EntityKey, MediaKind};
use time::UtcDateTime;

/// An anime or manga, shared by every library entry that references it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub id: i64,
    pub kind: MediaKind,
    pub slug: String,
    pub title: String,
    /// Episode count for anime, chapter count for manga (None if unknown).
    pub unit_count: Option<u32>,
    /// e.g. `TV`, `movie`, `manga`, `novel`
    pub subtype: Option<String>,
    pub updated_at: UtcDateTime,
}
impl Media {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(self.kind.entity_kind(), self.id)
    }
}
