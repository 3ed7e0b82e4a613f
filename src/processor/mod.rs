//! Per-item processing capability
//!
//! The engine does not know what processing a file means. It hands each owned
//! item to an [`ItemProcessor`] chosen by the unit's source kind and records
//! whatever metadata comes back.

pub mod command;

pub use command::CommandProcessor;

use crate::checkpoint::ItemMetadata;
use crate::model::{Item, SourceKind, WorkUnit};
use async_trait::async_trait;
use std::sync::Arc;

/// Everything a processor gets to see about one item
#[derive(Debug, Clone, Copy)]
pub struct ItemJob<'a> {
    pub item: &'a Item,
    pub unit: &'a WorkUnit,
    pub kind: SourceKind,
}

/// Processes one item to completion
#[async_trait]
pub trait ItemProcessor: Send + Sync {
    async fn process(&self, job: ItemJob<'_>) -> anyhow::Result<ItemMetadata>;
}

/// Processor selection by source kind
#[derive(Clone)]
pub struct Processors {
    raw: Option<Arc<dyn ItemProcessor>>,
    prepared: Option<Arc<dyn ItemProcessor>>,
}

impl Processors {
    pub fn new(
        raw: Option<Arc<dyn ItemProcessor>>,
        prepared: Option<Arc<dyn ItemProcessor>>,
    ) -> Self {
        Self { raw, prepared }
    }

    /// Use the same processor for raw and prepared sources
    pub fn uniform(processor: Arc<dyn ItemProcessor>) -> Self {
        Self {
            raw: Some(processor.clone()),
            prepared: Some(processor),
        }
    }

    pub fn for_kind(&self, kind: SourceKind) -> Option<Arc<dyn ItemProcessor>> {
        match kind {
            SourceKind::Raw => self.raw.clone(),
            SourceKind::Prepared => self.prepared.clone(),
            SourceKind::None => None,
        }
    }
}

impl std::fmt::Debug for Processors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processors")
            .field("raw", &self.raw.is_some())
            .field("prepared", &self.prepared.is_some())
            .finish()
    }
}
