//! Entity resolution and backup policy storage.
//!
//! Both are collaborators of the manager: the registry that maps an entity
//! id to its working directory, and the record holding each entity's
//! auto-backup policy. The daemon backs them with the config file and a
//! small JSON state file.

pub mod policy_store;

use crate::config::EntityConfig;
use std::collections::HashMap;
use std::path::PathBuf;

pub use policy_store::{FilePolicyStore, PolicyStore};

/// What the manager needs to know about an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityRecord {
    pub root_path: PathBuf,
}

/// Resolves an entity id to its working directory.
pub trait EntityResolver: Send + Sync {
    fn resolve(&self, entity_id: &str) -> Option<EntityRecord>;
}

/// Fixed set of entities, typically loaded from the config file.
#[derive(Debug, Clone, Default)]
pub struct StaticEntities {
    roots: HashMap<String, PathBuf>,
}

impl StaticEntities {
    pub fn new<I, S, P>(entities: I) -> Self
    where
        I: IntoIterator<Item = (S, P)>,
        S: Into<String>,
        P: Into<PathBuf>,
    {
        Self {
            roots: entities
                .into_iter()
                .map(|(id, root)| (id.into(), root.into()))
                .collect(),
        }
    }

    pub fn from_config(entities: &[EntityConfig]) -> Self {
        Self::new(entities.iter().map(|e| (e.id.clone(), e.root.clone())))
    }
}

impl EntityResolver for StaticEntities {
    fn resolve(&self, entity_id: &str) -> Option<EntityRecord> {
        self.roots.get(entity_id).map(|root| EntityRecord {
            root_path: root.clone(),
        })
    }
}
