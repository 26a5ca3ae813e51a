//! Consumers of fetched pages.

use crate::error::{ErrorKind, Result};
use async_trait::async_trait;
use exn::ResultExt;
use kura_model::models::Entity;
use kura_store::EntityStore;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Receives every non-empty batch of entities as soon as its page arrives.
///
/// Batches of one category arrive in page order; batches of different
/// categories interleave freely. An error fails the category that delivered
/// the batch, and is never retried.
#[async_trait]
pub trait PageSink: Send + Sync {
    async fn on_fetch(&self, entities: Vec<Entity>) -> Result<()>;
}

pub type SinkHandle = Arc<dyn PageSink>;

#[async_trait]
impl PageSink for EntityStore {
    async fn on_fetch(&self, entities: Vec<Entity>) -> Result<()> {
        let report = self.upsert(entities).await.or_raise(|| ErrorKind::Storage)?;
        for (key, reason) in &report.rejected {
            tracing::warn!(%key, %reason, "rejected fetched entity");
        }
        tracing::debug!(accepted = report.accepted, changed = report.changed, "stored fetched batch");
        Ok(())
    }
}

/// Forwards batches to a channel, e.g. to process them on another task.
#[async_trait]
impl PageSink for mpsc::UnboundedSender<Vec<Entity>> {
    async fn on_fetch(&self, entities: Vec<Entity>) -> Result<()> {
        self.send(entities).or_raise(|| ErrorKind::Storage)
    }
}
