//! Entity type registry and per-request loader construction
//!
//! [`EntityConfig`]s are registered once at process start into an
//! [`EntityRegistry`], which is read-only for the process lifetime and shared
//! by all requests. Loaders themselves cannot be built until a request
//! arrives, because each loader is bound to the selection the request asked
//! for. [`EntityRegistry::build_loaders`] constructs one loader per selected
//! type, scoped to that single request.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;

use crate::entity::{EntityRef, Key};
use crate::error::{ResolveError, Result};
use crate::loader::{BatchSource, Loader};
use crate::selection::SelectionMap;

/// Maps a reference to its canonical key. Must be pure and consistent with
/// the identity field the store joins on.
pub type KeyExtractor = Arc<dyn Fn(&EntityRef) -> Result<Key> + Send + Sync>;

/// Key extractor reading a single named identity field off the reference.
///
/// Covers the common `@key(fields: "id")` case. A missing or non-scalar
/// field is a `MalformedReference` configuration error.
pub fn field_key_extractor(field: &str) -> KeyExtractor {
    let field = field.to_string();
    Arc::new(move |reference: &EntityRef| {
        reference
            .field(&field)
            .and_then(Key::from_value)
            .ok_or_else(|| ResolveError::MalformedReference {
                typename: reference.typename.clone(),
                field: field.clone(),
            })
    })
}

/// Configuration for one resolvable entity type.
///
/// Immutable once registered. The key extractor must align with whatever
/// identity field the batch source's records carry.
#[derive(Clone)]
pub struct EntityConfig {
    name: String,
    key_extractor: KeyExtractor,
    source: Arc<dyn BatchSource>,
}

impl EntityConfig {
    /// Configure an entity type keyed by its `id` field
    pub fn new(name: &str, source: Arc<dyn BatchSource>) -> Self {
        Self {
            name: name.to_string(),
            key_extractor: field_key_extractor("id"),
            source,
        }
    }

    /// Key the entity by a different identity field
    pub fn with_key_field(mut self, field: &str) -> Self {
        self.key_extractor = field_key_extractor(field);
        self
    }

    /// Key the entity with a custom extractor
    pub fn with_key_extractor(mut self, extractor: KeyExtractor) -> Self {
        self.key_extractor = extractor;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Process-wide registry of entity type configurations.
///
/// Built once at startup, then shared read-only across all requests.
pub struct EntityRegistry {
    configs: HashMap<String, EntityConfig>,
}

impl EntityRegistry {
    /// Build a registry from the registered configs. A duplicate type name
    /// replaces the earlier registration.
    pub fn new(configs: Vec<EntityConfig>) -> Self {
        let configs = configs
            .into_iter()
            .map(|c| (c.name.clone(), c))
            .collect();
        Self { configs }
    }

    /// Look up the configuration for an entity type
    pub fn config(&self, typename: &str) -> Option<&EntityConfig> {
        self.configs.get(typename)
    }

    /// Registered type names, for diagnostics
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    /// Construct the per-request loader set for a partitioned selection.
    ///
    /// One loader per type present in the selection map, each bound to
    /// (batch source, key extractor, that type's sub-selection). Fails with
    /// `MisconfiguredType` if the selection names a type that was never
    /// registered. The returned set must not outlive the request.
    pub fn build_loaders(&self, selections: &SelectionMap) -> Result<LoaderSet> {
        let mut loaders = HashMap::with_capacity(selections.len());
        for (typename, selection) in selections {
            let config = self
                .configs
                .get(typename)
                .ok_or_else(|| ResolveError::MisconfiguredType(typename.clone()))?;
            loaders.insert(
                typename.clone(),
                Loader::new(
                    typename.clone(),
                    selection.clone(),
                    config.key_extractor.clone(),
                    config.source.clone(),
                ),
            );
        }
        Ok(LoaderSet { loaders })
    }
}

/// The loaders of one in-flight request, keyed by entity type name.
///
/// Exclusively owned by the request that created it; discarded when the
/// request completes.
#[derive(Debug)]
pub struct LoaderSet {
    loaders: HashMap<String, Loader>,
}

impl LoaderSet {
    /// Look up the loader for a reference's discriminant.
    ///
    /// `MisconfiguredType` here is fatal for that single reference only;
    /// the caller reports it per-item and resolves siblings normally.
    pub fn get(&self, typename: &str) -> Result<&Loader> {
        self.loaders
            .get(typename)
            .ok_or_else(|| ResolveError::MisconfiguredType(typename.to_string()))
    }

    /// Close every loader's current window, dispatching their batch fetches
    /// concurrently. The coalescing boundary: every `load()` registered
    /// before this call belongs to the windows dispatched here.
    pub async fn flush_all(&self) {
        join_all(self.loaders.values().map(Loader::dispatch)).await;
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }
}
