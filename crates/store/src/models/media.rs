use super::timestamp;
use crate::error::{Error, ErrorKind};
use exn::ResultExt;
use kura_model::models::{Media, MediaKind};

#[derive(Debug, sqlx::FromRow)]
pub(crate) struct MediaRow {
    pub(crate) kind: String,
    pub(crate) id: i64,
    pub(crate) slug: String,
    pub(crate) title: String,
    #[sqlx(default)]
    pub(crate) unit_count: Option<i64>,
    #[sqlx(default)]
    pub(crate) subtype: Option<String>,
    pub(crate) updated_at: i64,
}
impl From<&Media> for MediaRow {
    fn from(media: &Media) -> Self {
        Self {
            kind: media.kind.as_str().to_string(),
            id: media.id,
            slug: media.slug.clone(),
            title: media.title.clone(),
            unit_count: media.unit_count.map(i64::from),
            subtype: media.subtype.clone(),
            updated_at: media.updated_at.unix_timestamp(),
        }
    }
}
impl TryFrom<MediaRow> for Media {
    type Error = Error;
    fn try_from(row: MediaRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            kind: row.kind.parse::<MediaKind>().or_raise(|| ErrorKind::InvalidData("media kind"))?,
            slug: row.slug,
            title: row.title,
            unit_count: row
                .unit_count
                .map(|c| u32::try_from(c).or_raise(|| ErrorKind::InvalidData("unit count")))
                .transpose()?,
            subtype: row.subtype,
            updated_at: timestamp(row.updated_at, "updated at")?,
        })
    }
}
