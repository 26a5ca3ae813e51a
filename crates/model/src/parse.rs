//! Record parsing.
//!
//! Turning the raw bytes of a fetched record into an [`Entity`] is a
//! pluggable step: the sync engine only ever sees the [`Parse`] trait. The
//! bundled [`JsonApiParser`] understands the JSON:API resources returned by
//! Kitsu-style library endpoints (`libraryEntries`, `anime`, `manga`, `users`).

use crate::error::{ErrorKind, Result};
use crate::models::{Entity, EntityKind, LibraryEntry, Media, MediaKind, User};
use exn::{OptionExt, ResultExt};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcDateTime};
use tracing::instrument;

/// Converts one raw remote record into an entity.
///
/// An error means the record is malformed; callers are expected to skip it
/// and carry on with the rest of the page.
pub trait Parse: Send + Sync {
    fn parse(&self, record: &[u8]) -> Result<Entity>;
}

pub type ParserHandle = Arc<dyn Parse>;

/// Parser for JSON:API resource objects.
///
/// # Examples
///
/// ```
/// use kura_model::{JsonApiParser, Parse, models::Entity};
///
/// let record = br#"{"id": "42", "type": "users", "attributes": {"name": "Maka"}}"#;
/// let Entity::User(user) = JsonApiParser.parse(record).unwrap() else { panic!() };
/// assert_eq!(user.id, 42);
/// assert_eq!(user.name, "Maka");
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonApiParser;

impl Parse for JsonApiParser {
    #[instrument(level = "trace", skip_all, fields(bytes = record.len()))]
    fn parse(&self, record: &[u8]) -> Result<Entity> {
        let resource: Resource = serde_json::from_slice(record).or_raise(|| ErrorKind::InvalidJson)?;
        let kind = resource.kind.parse::<EntityKind>()?;
        let id = parse_id(resource.id.as_ref(), "id")?;
        Ok(match kind {
            EntityKind::LibraryEntry => Entity::LibraryEntry(resource.library_entry(id)?),
            EntityKind::Anime => Entity::Media(resource.media(id, MediaKind::Anime)?),
            EntityKind::Manga => Entity::Media(resource.media(id, MediaKind::Manga)?),
            EntityKind::User => Entity::User(resource.user(id)?),
        })
    }
}

#[derive(Deserialize)]
struct Resource {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Map<String, Value>,
    #[serde(default)]
    relationships: HashMap<String, Relationship>,
}

#[derive(Deserialize)]
struct Relationship {
    data: Option<Linkage>,
}

#[derive(Deserialize)]
struct Linkage {
    id: Option<Value>,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct EntryAttributes {
    status: String,
    #[serde(default)]
    progress: u32,
    #[serde(default)]
    reconsume_count: u32,
    rating_twenty: Option<u8>,
    notes: Option<String>,
    #[serde(default)]
    private: bool,
    updated_at: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaAttributes {
    slug: String,
    canonical_title: String,
    episode_count: Option<u32>,
    chapter_count: Option<u32>,
    subtype: Option<String>,
    updated_at: String,
}

#[derive(Deserialize)]
struct UserAttributes {
    name: String,
    about: Option<String>,
}

impl Resource {
    fn attributes<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(Value::Object(self.attributes.clone())).or_raise(|| ErrorKind::ParseError {
            field: "attributes",
            value: self.kind.clone(),
        })
    }

    fn linkage(&self, names: &[&'static str]) -> Option<&Linkage> {
        names.iter().find_map(|name| self.relationships.get(*name).and_then(|r| r.data.as_ref()))
    }

    fn library_entry(&self, id: i64) -> Result<LibraryEntry> {
        let attributes: EntryAttributes = self.attributes()?;
        let media = self.linkage(&["media", "anime", "manga"]).ok_or_raise(|| ErrorKind::MissingField("media"))?;
        let user = self.linkage(&["user"]).ok_or_raise(|| ErrorKind::MissingField("user"))?;
        Ok(LibraryEntry {
            id,
            user_id: parse_id(user.id.as_ref(), "user")?,
            media_id: parse_id(media.id.as_ref(), "media")?,
            media_kind: media.kind.parse()?,
            status: attributes.status.parse()?,
            progress: attributes.progress,
            reconsume_count: attributes.reconsume_count,
            rating: attributes.rating_twenty,
            notes: attributes.notes.filter(|n| !n.is_empty()),
            private: attributes.private,
            updated_at: parse_timestamp(&attributes.updated_at, "updatedAt")?,
        })
    }

    fn media(&self, id: i64, kind: MediaKind) -> Result<Media> {
        let attributes: MediaAttributes = self.attributes()?;
        let unit_count = match kind {
            MediaKind::Anime => attributes.episode_count,
            MediaKind::Manga => attributes.chapter_count,
        };
        Ok(Media {
            id,
            kind,
            slug: attributes.slug,
            title: attributes.canonical_title,
            unit_count,
            subtype: attributes.subtype,
            updated_at: parse_timestamp(&attributes.updated_at, "updatedAt")?,
        })
    }

    fn user(&self, id: i64) -> Result<User> {
        let attributes: UserAttributes = self.attributes()?;
        Ok(User {
            id,
            name: attributes.name,
            about: attributes.about.filter(|a| !a.is_empty()),
        })
    }
}

/// JSON:API ids are strings, but be lenient and accept numbers too.
fn parse_id(value: Option<&Value>, field: &'static str) -> Result<i64> {
    let id = match value {
        Some(Value::String(s)) => s.parse::<i64>().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        None | Some(Value::Null) => exn::bail!(ErrorKind::MissingField(field)),
        Some(_) => None,
    };
    match id {
        Some(id) if id > 0 => Ok(id),
        _ => exn::bail!(ErrorKind::ParseError {
            field,
            value: value.map(Value::to_string).unwrap_or_default(),
        }),
    }
}

/// Parses an RFC 3339 timestamp, truncated to whole seconds (the precision
/// the store persists).
fn parse_timestamp(value: &str, field: &'static str) -> Result<UtcDateTime> {
    let parsed = OffsetDateTime::parse(value, &Rfc3339).or_raise(|| ErrorKind::ParseError {
        field,
        value: value.to_string(),
    })?;
    UtcDateTime::from_unix_timestamp(parsed.unix_timestamp()).or_raise(|| ErrorKind::ParseError {
        field,
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use rstest::rstest;

    const ENTRY: &str = r#"{
        "id": "1337",
        "type": "libraryEntries",
        "attributes": {
            "status": "on_hold",
            "progress": 12,
            "reconsumeCount": 1,
            "ratingTwenty": 16,
            "notes": "",
            "private": false,
            "updatedAt": "2017-01-03T11:52:02.402Z"
        },
        "relationships": {
            "media": {"data": {"id": "1", "type": "anime"}},
            "user": {"data": {"id": "42", "type": "users"}}
        }
    }"#;

    #[test]
    fn test_parse_library_entry() {
        let Entity::LibraryEntry(entry) = JsonApiParser.parse(ENTRY.as_bytes()).unwrap() else {
            panic!("expected a library entry");
        };
        assert_eq!(entry.id, 1337);
        assert_eq!(entry.user_id, 42);
        assert_eq!(entry.media_id, 1);
        assert_eq!(entry.media_kind, MediaKind::Anime);
        assert_eq!(entry.status, Category::OnHold);
        assert_eq!(entry.progress, 12);
        assert_eq!(entry.reconsume_count, 1);
        assert_eq!(entry.rating, Some(16));
        assert_eq!(entry.notes, None);
        assert_eq!(entry.updated_at.unix_timestamp(), 1483444322);
    }

    #[rstest]
    #[case("anime", MediaKind::Anime, Some(26))]
    #[case("manga", MediaKind::Manga, Some(162))]
    fn test_parse_media(#[case] kind: &str, #[case] expected: MediaKind, #[case] units: Option<u32>) {
        let record = format!(
            r#"{{"id": "7", "type": "{kind}", "attributes": {{
                "slug": "cowboy-bebop", "canonicalTitle": "Cowboy Bebop",
                "episodeCount": 26, "chapterCount": 162, "subtype": "TV",
                "updatedAt": "2017-01-03T11:52:02Z"
            }}}}"#
        );
        let Entity::Media(media) = JsonApiParser.parse(record.as_bytes()).unwrap() else {
            panic!("expected media");
        };
        assert_eq!(media.id, 7);
        assert_eq!(media.kind, expected);
        assert_eq!(media.title, "Cowboy Bebop");
        assert_eq!(media.unit_count, units);
    }

    #[test]
    fn test_numeric_ids_are_accepted() {
        let record = br#"{"id": 9, "type": "users", "attributes": {"name": "Spike"}}"#;
        assert_eq!(JsonApiParser.parse(record).unwrap().id(), 9);
    }

    #[rstest]
    #[case::not_json(b"not json".as_slice(), ErrorKind::InvalidJson)]
    #[case::missing_id(br#"{"type": "users", "attributes": {"name": "x"}}"#.as_slice(), ErrorKind::MissingField("id"))]
    #[case::unknown_type(br#"{"id": "1", "type": "groups"}"#.as_slice(), ErrorKind::UnknownType("groups".to_string()))]
    fn test_malformed_records(#[case] record: &[u8], #[case] expected: ErrorKind) {
        let err = JsonApiParser.parse(record).unwrap_err();
        assert_eq!(*err, expected);
    }

    #[test]
    fn test_entry_without_media_is_rejected() {
        let record = br#"{"id": "1", "type": "libraryEntries", "attributes": {
            "status": "current", "updatedAt": "2017-01-03T11:52:02Z"
        }, "relationships": {"user": {"data": {"id": "42", "type": "users"}}}}"#;
        let err = JsonApiParser.parse(record).unwrap_err();
        assert_eq!(*err, ErrorKind::MissingField("media"));
    }

    #[test]
    fn test_invalid_status_is_rejected() {
        let record = ENTRY.replace("on_hold", "binging");
        let err = JsonApiParser.parse(record.as_bytes()).unwrap_err();
        assert!(matches!(&*err, ErrorKind::ParseError { field: "status", .. }));
    }
}
