//! Per-viewer entity filtering for race demos
//!
//! A race demo must only contain what its player could see of themselves:
//! their own entity and the entities they directly own. The frame builder
//! honours the `SVF_NOCLIENT` flag, so the filter temporarily sets that flag
//! on everything else and puts every flag back once the frame is built.

use shared::{Entity, EntityId, SVF_NOCLIENT};
use std::ops::Deref;

/// Every entity's `svflags`, captured before a filter was applied
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMask {
    flags: Vec<u32>,
}

impl SavedMask {
    pub fn capture(entities: &[Entity]) -> Self {
        Self {
            flags: entities.iter().map(|e| e.svflags).collect(),
        }
    }

    /// Writes every saved flag back verbatim
    pub fn restore(&self, entities: &mut [Entity]) {
        for (entity, flags) in entities.iter_mut().zip(&self.flags) {
            entity.svflags = *flags;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct VisibilityFilter {
    viewer: EntityId,
    max_clients: usize,
}

impl VisibilityFilter {
    pub fn new(viewer: EntityId, max_clients: usize) -> Self {
        Self {
            viewer,
            max_clients,
        }
    }

    pub fn viewer(&self) -> EntityId {
        self.viewer
    }

    /// True if the entity must not appear in the viewer's demo
    pub fn hides(&self, entity: &Entity) -> bool {
        let is_player_slot = entity.number >= 1 && entity.number as usize <= self.max_clients;
        if is_player_slot && entity.number != self.viewer {
            return true;
        }
        matches!(entity.owner, Some(owner) if owner != self.viewer)
    }

    /// Saves every flag and hides what the viewer must not see
    pub fn apply(&self, entities: &mut [Entity]) -> SavedMask {
        let saved = SavedMask::capture(entities);
        for entity in entities.iter_mut() {
            if self.hides(entity) {
                entity.svflags |= SVF_NOCLIENT;
            }
        }
        saved
    }

    /// Applies the filter for the lifetime of the returned guard
    pub fn scoped<'a>(&self, entities: &'a mut [Entity]) -> AppliedFilter<'a> {
        let saved = self.apply(entities);
        AppliedFilter { entities, saved }
    }
}

/// Filtered view of the entity table, restored when dropped
pub struct AppliedFilter<'a> {
    entities: &'a mut [Entity],
    saved: SavedMask,
}

impl Deref for AppliedFilter<'_> {
    type Target = [Entity];

    fn deref(&self) -> &[Entity] {
        &*self.entities
    }
}

impl Drop for AppliedFilter<'_> {
    fn drop(&mut self) {
        self.saved.restore(self.entities);
    }
}
