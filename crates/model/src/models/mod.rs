mod category;
mod entity;
mod entry;
mod kind;
mod media;
mod user;

pub use self::category::Category;
pub use self::entity::{Entity, Record};
pub use self::entry::LibraryEntry;
pub use self::kind::{EntityKey, EntityKind, MediaKind};
pub use self::media::Media;
pub use self::user::User;

fn sanitize(s: impl AsRef<str>) -> String {
    s.as_ref().trim().to_lowercase().replace('/', "").replace('-', "").replace('_', "").replace(' ', "")
}
