//! Paginated fetching from a remote media library.
//!
//! The only network operation the sync engine performs is "give me one page
//! of this filtered listing", modelled by [`RemoteSource::fetch_page`].
//! [`PageCursor`] turns that into a sequential walk over every page.

pub mod error;
mod page;
pub mod source;

pub use crate::page::{PageCursor, PageDescriptor, PagedRequest, RawPage, RawRecord};
#[cfg(feature = "http")]
pub use crate::source::HttpSource;
#[cfg(feature = "mock")]
pub use crate::source::MockSource;
pub use crate::source::RemoteSource;
use std::sync::Arc;

pub type SourceHandle = Arc<dyn RemoteSource>;
