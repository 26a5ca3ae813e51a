//! Raw JSON:API records for tests.

use kura_model::models::Category;
use kura_remote::RawRecord;

pub(crate) const OWNER: i64 = 42;

pub(crate) fn entry_record(id: i64, media_id: i64, status: Category) -> RawRecord {
    format!(
        r#"{{"id": "{id}", "type": "libraryEntries",
            "attributes": {{"status": "{status}", "progress": 1, "updatedAt": "2024-05-01T12:00:00Z"}},
            "relationships": {{
                "media": {{"data": {{"id": "{media_id}", "type": "anime"}}}},
                "user": {{"data": {{"id": "{OWNER}", "type": "users"}}}}
            }}}}"#,
        status = status.as_str(),
    )
    .into_bytes()
}

pub(crate) fn anime_record(id: i64) -> RawRecord {
    format!(
        r#"{{"id": "{id}", "type": "anime", "attributes": {{
            "slug": "anime-{id}", "canonicalTitle": "Anime {id}", "episodeCount": 12,
            "updatedAt": "2024-01-01T00:00:00Z"
        }}}}"#
    )
    .into_bytes()
}

pub(crate) fn user_record() -> RawRecord {
    format!(r#"{{"id": "{OWNER}", "type": "users", "attributes": {{"name": "Ginko"}}}}"#).into_bytes()
}

/// `count` entries for one category, with ids unique across categories.
pub(crate) fn category_records(category: Category, count: usize) -> Vec<RawRecord> {
    let base = (category as i64 + 1) * 1000;
    (0..count as i64).map(|i| entry_record(base + i, 1 + i % 3, category)).collect()
}
