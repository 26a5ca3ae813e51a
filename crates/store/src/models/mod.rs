mod entry;
mod media;
mod user;

pub(crate) use self::entry::EntryRow;
pub(crate) use self::media::MediaRow;
pub(crate) use self::user::UserRow;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use time::UtcDateTime;

fn timestamp(value: i64, field: &'static str) -> Result<UtcDateTime> {
    UtcDateTime::from_unix_timestamp(value).or_raise(|| ErrorKind::InvalidData(field))
}
