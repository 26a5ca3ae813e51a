use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;

use super::sanitize;
use crate::error::{Error, ErrorKind};

/// Status partition of a library.
///
/// The set is fixed: every library is split into exactly these five
/// categories, and a full sync fetches each of them independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    /// Currently watching/reading.
    Current,
    /// Planned to watch/read.
    Planned,
    Completed,
    OnHold,
    Dropped,
}
impl Category {
    /// Every category, in the order a sync launches them.
    pub const ALL: [Category; 5] = [
        Category::Current,
        Category::Planned,
        Category::Completed,
        Category::OnHold,
        Category::Dropped,
    ];

    /// Returns the raw value used by the remote API (and the local database).
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Current => "current",
            Category::Planned => "planned",
            Category::Completed => "completed",
            Category::OnHold => "on_hold",
            Category::Dropped => "dropped",
        }
    }
}
impl FromStr for Category {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match sanitize(s).as_str() {
            "current" | "watching" | "reading" => Self::Current,
            "planned" | "plantowatch" | "plantoread" => Self::Planned,
            "completed" => Self::Completed,
            "onhold" => Self::OnHold,
            "dropped" => Self::Dropped,
            _ => exn::bail!(ErrorKind::ParseError {
                field: "status",
                value: s.to_string(),
            }),
        })
    }
}
impl Display for Category {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        write!(f, "{}", self.as_str())
    }
}
