//! Entities of a remote media library, and the parsing of raw records into them.
//!
//! Everything the sync engine stores is an [`Entity`](models::Entity):
//! library entries, the media they reference, and the users who own them.
//! Relations between entities are always by [`EntityKey`](models::EntityKey),
//! never embedded copies.

pub mod error;
pub mod models;
mod parse;

pub use crate::parse::{JsonApiParser, Parse, ParserHandle};
