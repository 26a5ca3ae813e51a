use super::{EntityKey, EntityKind};

/// A user who owns a library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub about: Option<String>,
}
impl User {
    pub fn key(&self) -> EntityKey {
        EntityKey::new(EntityKind::User, self.id)
    }
}
