use super::timestamp;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use kura_model::models::{Category, LibraryEntry, MediaKind};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct EntryRow {
    pub(crate) id: i64,
    pub(crate) user_id: i64,
    pub(crate) media_kind: String,
    pub(crate) media_id: i64,
    pub(crate) status: String,
    pub(crate) progress: i64,
    pub(crate) reconsume_count: i64,
    #[sqlx(default)]
    pub(crate) rating: Option<i64>,
    #[sqlx(default)]
    pub(crate) notes: Option<String>,
    pub(crate) private: bool,
    pub(crate) updated_at: i64,
}
impl From<&LibraryEntry> for EntryRow {
    fn from(entry: &LibraryEntry) -> Self {
        Self {
            id: entry.id,
            user_id: entry.user_id,
            media_kind: entry.media_kind.as_str().to_string(),
            media_id: entry.media_id,
            status: entry.status.as_str().to_string(),
            progress: i64::from(entry.progress),
            reconsume_count: i64::from(entry.reconsume_count),
            rating: entry.rating.map(i64::from),
            notes: entry.notes.clone(),
            private: entry.private,
            updated_at: entry.updated_at.unix_timestamp(),
        }
    }
}
impl TryFrom<EntryRow> for LibraryEntry {
    type Error = Error;
    fn try_from(row: EntryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            media_id: row.media_id,
            media_kind: row.media_kind.parse::<MediaKind>().or_raise(|| ErrorKind::InvalidData("media kind"))?,
            status: row.status.parse::<Category>().or_raise(|| ErrorKind::InvalidData("status"))?,
            progress: u32::try_from(row.progress).or_raise(|| ErrorKind::InvalidData("progress"))?,
            reconsume_count: u32::try_from(row.reconsume_count).or_raise(|| ErrorKind::InvalidData("reconsume count"))?,
            rating: row
                .rating
                .map(|r| u8::try_from(r).or_raise(|| ErrorKind::InvalidData("rating")))
                .transpose()?,
            notes: row.notes,
            private: row.private,
            updated_at: timestamp(row.updated_at, "updated at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::UtcDateTime;

    fn row() -> EntryRow {
        EntryRow {
            id: 1337,
            user_id: 42,
            media_kind: "manga".to_string(),
            media_id: 7,
            status: "on_hold".to_string(),
            progress: 12,
            reconsume_count: 0,
            rating: Some(14),
            notes: None,
            private: true,
            updated_at: 1483444322,
        }
    }

    #[test]
    fn test_row_to_model() {
        let entry = LibraryEntry::try_from(row()).unwrap();
        assert_eq!(entry.media_kind, MediaKind::Manga);
        assert_eq!(entry.status, Category::OnHold);
        assert_eq!(entry.rating, Some(14));
        assert_eq!(entry.updated_at, UtcDateTime::from_unix_timestamp(1483444322).unwrap());
        let back = EntryRow::from(&entry);
        assert_eq!(back.status, "on_hold");
        assert_eq!(back.updated_at, 1483444322);
    }

    #[test]
    fn test_invalid_rows_are_rejected() {
        let err = LibraryEntry::try_from(EntryRow { status: "binging".to_string(), ..row() }).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("status"));
        let err = LibraryEntry::try_from(EntryRow { progress: -1, ..row() }).unwrap_err();
        assert_eq!(*err, ErrorKind::InvalidData("progress"));
    }
}
