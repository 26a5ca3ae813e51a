use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::sanitize;
use crate::error::{Error, ErrorKind};

/// The kind of media a library tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum MediaKind {
    Anime,
    Manga,
}
impl MediaKind {
    /// Returns the lowercase name, which is also the JSON:API resource type.
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Anime => "anime",
            MediaKind::Manga => "manga",
        }
    }

    /// Returns the value the remote library endpoint expects for its
    /// `media_type` filter.
    pub fn library_filter(&self) -> &'static str {
        match self {
            MediaKind::Anime => "Anime",
            MediaKind::Manga => "Manga",
        }
    }

    /// Returns the entity kind media of this kind is stored under.
    pub fn entity_kind(&self) -> EntityKind {
        match self {
            MediaKind::Anime => EntityKind::Anime,
            MediaKind::Manga => EntityKind::Manga,
        }
    }
}
impl FromStr for MediaKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "anime" => Self::Anime,
            "manga" => Self::Manga,
            _ => exn::bail!(ErrorKind::ParseError {
                field: "media kind",
                value: s.to_string(),
            }),
        })
    }
}
impl Display for MediaKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Every type of entity the store keeps.
///
/// Ids are only unique within a kind: anime `1` and manga `1` are unrelated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityKind {
    LibraryEntry,
    Anime,
    Manga,
    User,
}
impl EntityKind {
    /// Returns the JSON:API resource type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::LibraryEntry => "libraryEntries",
            EntityKind::Anime => "anime",
            EntityKind::Manga => "manga",
            EntityKind::User => "users",
        }
    }
}
impl FromStr for EntityKind {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "libraryentries" | "libraryentry" => Self::LibraryEntry,
            "anime" => Self::Anime,
            "manga" => Self::Manga,
            "users" | "user" => Self::User,
            _ => exn::bail!(ErrorKind::UnknownType(s.to_string())),
        })
    }
}
impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}

/// Identity of a stored entity: unique across the whole store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: i64,
}
impl EntityKey {
    pub fn new(kind: EntityKind, id: i64) -> Self {
        Self { kind, id }
    }
}
impl Display for EntityKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}#{}", self.kind, self.id)
    }
}
