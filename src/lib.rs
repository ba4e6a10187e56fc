//! entity-loader: batched, deduplicated, order-preserving entity
//! reference resolution for federated graph queries.
//!
//! A federation-style "resolve these mixed-type references" query hands this
//! crate one composite selection and a list of typed references. The crate
//! coalesces all reference lookups of one request into the minimum number of
//! batch fetches (one per entity type), deduplicates keys, and redistributes
//! the results back in the exact order the references arrived, with explicit
//! missing markers for keys the store did not return.
//!
//! # Architecture
//!
//! - [`selection`]: selection tree model and the per-type partitioner
//! - [`registry`]: process-wide entity type configs and per-request loader
//!   construction
//! - [`loader`]: the coalescing batch loader core (window state machine)
//! - [`resolver`]: the per-request entry point binding results back to
//!   references
//!
//! # Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use entity_loader::{
//!     BatchSource, EntityConfig, EntityRef, EntityRegistry, EntityResolver,
//! };
//! # fn movie_source() -> Arc<dyn BatchSource> { unimplemented!() }
//! # fn actor_source() -> Arc<dyn BatchSource> { unimplemented!() }
//!
//! # async fn run() -> entity_loader::Result<()> {
//! // Once, at process start:
//! let resolver = EntityResolver::new(EntityRegistry::new(vec![
//!     EntityConfig::new("Movie", movie_source()),
//!     EntityConfig::new("Actor", actor_source()),
//! ]));
//!
//! // Per incoming request:
//! let outcomes = resolver
//!     .resolve_entities_from_text(
//!         "{ ... on Movie { id title } ... on Actor { id name } }",
//!         &[
//!             EntityRef::with_id("Movie", "1"),
//!             EntityRef::with_id("Actor", "9"),
//!             EntityRef::with_id("Movie", "1"),
//!         ],
//!     )
//!     .await?;
//! assert_eq!(outcomes.len(), 3);
//! # Ok(())
//! # }
//! ```
//!
//! The Movie store is fetched once with keys `["1"]`, the Actor store once
//! with `["9"]`; the first and third outcomes are the same resolved record.

pub mod entity;
pub mod error;
pub mod loader;
pub mod registry;
pub mod resolver;
pub mod selection;

pub use entity::{Entity, EntityOutcome, EntityRef, Key, Record};
pub use error::{ResolveError, Result};
pub use loader::{BatchSource, Loader, PendingLoad};
pub use registry::{field_key_extractor, EntityConfig, EntityRegistry, KeyExtractor, LoaderSet};
pub use resolver::EntityResolver;
pub use selection::{Selection, SelectionMap, SelectionSet};
