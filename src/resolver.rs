//! Entity resolution entry point: the result binder
//!
//! [`EntityResolver::resolve_entities`] is the per-request surface: it takes
//! the request's composite selection and its list of typed references, and
//! returns one outcome per reference in the original reference order. The
//! per-type loaders batch and reorder internally; order is restored here,
//! per reference, not inside the loaders.

use tracing::debug;

use crate::entity::{EntityOutcome, EntityRef};
use crate::error::{ResolveError, Result};
use crate::loader::PendingLoad;
use crate::registry::EntityRegistry;
use crate::selection::SelectionSet;

/// One reference's slot between registration and the flush
enum Slot {
    Pending { typename: String, load: PendingLoad },
    Failed(ResolveError),
}

/// Resolves mixed-type reference lists against the registered entity types.
///
/// Holds only the process-wide read-only registry; all per-request state
/// (loaders, windows) is created inside [`resolve_entities`] and dropped
/// when it returns.
pub struct EntityResolver {
    registry: EntityRegistry,
}

impl EntityResolver {
    pub fn new(registry: EntityRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    /// Resolve a list of references under one composite selection.
    ///
    /// Control flow:
    ///
    /// 1. partition the selection into per-type sub-selections;
    /// 2. build the request-scoped loader set (fails with
    ///    `MisconfiguredType` if the selection names an unregistered type);
    /// 3. register every reference's load synchronously (no awaits, so all
    ///    registrations land in the same coalescing window);
    /// 4. flush all loaders: one batch fetch per type with deduplicated
    ///    keys;
    /// 5. await each reference's slot, in the original order.
    ///
    /// A reference whose discriminant has no loader, or whose key field is
    /// malformed, yields a per-reference `Failed` outcome; sibling
    /// references still resolve.
    pub async fn resolve_entities(
        &self,
        selection: &SelectionSet,
        references: &[EntityRef],
    ) -> Result<Vec<EntityOutcome>> {
        let selections = selection.partition_by_type();
        let loaders = self.registry.build_loaders(&selections)?;
        debug!(
            references = references.len(),
            types = loaders.len(),
            "resolving entity references"
        );

        let mut slots = Vec::with_capacity(references.len());
        for reference in references {
            let slot = loaders
                .get(&reference.typename)
                .and_then(|loader| loader.load_ref(reference))
                .map_or_else(Slot::Failed, |load| Slot::Pending {
                    typename: reference.typename.clone(),
                    load,
                });
            slots.push(slot);
        }

        // Coalescing boundary: every load above belongs to the windows
        // dispatched here, one batch fetch per entity type.
        loaders.flush_all().await;

        let mut outcomes = Vec::with_capacity(slots.len());
        for slot in slots {
            let outcome = match slot {
                Slot::Failed(err) => EntityOutcome::failed(&err),
                Slot::Pending { typename, load } => match load.wait().await {
                    Ok(Some(record)) => EntityOutcome::found(&typename, record),
                    Ok(None) => EntityOutcome::Missing,
                    Err(err) => EntityOutcome::failed(&err),
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    /// Parse the selection text, then resolve.
    ///
    /// Convenience for callers holding the selection in its printed form.
    pub async fn resolve_entities_from_text(
        &self,
        selection: &str,
        references: &[EntityRef],
    ) -> Result<Vec<EntityOutcome>> {
        let selection = SelectionSet::parse(selection)?;
        self.resolve_entities(&selection, references).await
    }
}
