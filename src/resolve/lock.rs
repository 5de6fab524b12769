//! Per-type critical sections for resolve-or-create

use crate::model::KeywordType;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per `KeywordType`.
///
/// Entity and concept resolution never contend with each other; two
/// mentions of the same type serialize their nearest-neighbour-then-write
/// step, so concurrent first sightings cannot both create a keyword.
#[derive(Debug, Clone, Default)]
pub struct TypeLocks {
    entity: Arc<Mutex<()>>,
    concept: Arc<Mutex<()>>,
}

impl TypeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, keyword_type: KeywordType) -> OwnedMutexGuard<()> {
        self.slot(keyword_type).clone().lock_owned().await
    }

    fn slot(&self, keyword_type: KeywordType) -> &Arc<Mutex<()>> {
        match keyword_type {
            KeywordType::Entity => &self.entity,
            KeywordType::Concept => &self.concept,
        }
    }
}
