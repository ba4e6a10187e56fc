//! Batch loader core: the coalescing window state machine
//!
//! A [`Loader`] queues `load(key)` calls, deduplicates keys within one
//! coalescing window, invokes its [`BatchSource`] exactly once per window,
//! and fans results back out to every waiter in submission order.
//!
//! # Window lifecycle
//!
//! `Idle → Collecting → Dispatching → Idle`, repeating while the loader is
//! alive:
//!
//! - the first `load()` after idle opens a window (`Collecting`);
//! - further `load()` calls enqueue `(key, waiter)` pairs;
//! - [`Loader::dispatch`] closes the window: the deduplicated keys (in
//!   first-occurrence order) go to the batch source in a single fetch, and
//!   every waiter is resolved with its record, with the missing marker
//!   (`None`), or with the window's shared failure.
//!
//! Rust has no microtask boundary to defer dispatch to, so closing the
//! window is explicit: the orchestrating layer calls `dispatch()` once all
//! sibling resolution tasks have registered their keys. `load()` itself
//! never suspends; the only await point is the batch fetch inside
//! `dispatch()`.
//!
//! There is no backpressure: a window grows with the number of references
//! in the request and is fetched in one unchunked call. Known limitation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::entity::{EntityRef, Key, Record};
use crate::error::{ResolveError, Result};
use crate::registry::KeyExtractor;
use crate::selection::SelectionSet;

/// The underlying store contract consumed by a loader.
///
/// One call resolves a list of keys to records in a single round trip. The
/// store gives no ordering guarantee; each returned [`Record`] carries the
/// identity key the loader joins on. Keys absent from the result are not an
/// error.
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn fetch(&self, keys: &[Key], selection: &SelectionSet) -> anyhow::Result<Vec<Record>>;
}

type LoadResult = std::result::Result<Option<Record>, ResolveError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WindowState {
    Idle,
    Collecting,
    Dispatching,
}

/// Pending keys and waiters of the current window
struct Window {
    state: WindowState,
    pending: Vec<(Key, oneshot::Sender<LoadResult>)>,
}

/// One batching loader, bound to a single (entity type, selection) pair.
///
/// Created per incoming request by the registry and discarded when the
/// request completes. There is no cross-request cache, which bounds
/// staleness and memory at the cost of no amortization across requests.
pub struct Loader {
    typename: String,
    selection: SelectionSet,
    extractor: KeyExtractor,
    source: Arc<dyn BatchSource>,
    window: Mutex<Window>,
}

impl std::fmt::Debug for Loader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Loader")
            .field("typename", &self.typename)
            .field("selection", &self.selection)
            .finish_non_exhaustive()
    }
}

/// A waiter for one `load()` call. Await it with [`PendingLoad::wait`]
/// after the window has been dispatched.
#[derive(Debug)]
pub struct PendingLoad {
    typename: String,
    rx: oneshot::Receiver<LoadResult>,
}

impl PendingLoad {
    /// Wait for the window this load belongs to.
    ///
    /// `Ok(None)` is the missing-sentinel: the batch fetch completed but
    /// returned no record for this key.
    pub async fn wait(self) -> Result<Option<Record>> {
        match self.rx.await {
            Ok(result) => result,
            // Sender dropped without resolving: the loader was discarded
            // while this window was still open.
            Err(_) => Err(ResolveError::WindowAbandoned(self.typename)),
        }
    }
}

impl Loader {
    pub(crate) fn new(
        typename: String,
        selection: SelectionSet,
        extractor: KeyExtractor,
        source: Arc<dyn BatchSource>,
    ) -> Self {
        Self {
            typename,
            selection,
            extractor,
            source,
            window: Mutex::new(Window {
                state: WindowState::Idle,
                pending: Vec::new(),
            }),
        }
    }

    /// Entity type this loader is bound to
    pub fn typename(&self) -> &str {
        &self.typename
    }

    /// Selection this loader passes to every batch fetch
    pub fn selection(&self) -> &SelectionSet {
        &self.selection
    }

    /// Register one key in the current window.
    ///
    /// Never suspends and never fetches; duplicates are accepted and each
    /// receives its own waiter. Results arrive only after [`dispatch`].
    ///
    /// [`dispatch`]: Loader::dispatch
    pub fn load(&self, key: Key) -> PendingLoad {
        let (tx, rx) = oneshot::channel();
        let mut window = self.window.lock().expect("loader window lock poisoned");
        if window.state == WindowState::Idle {
            window.state = WindowState::Collecting;
        }
        window.pending.push((key, tx));
        PendingLoad {
            typename: self.typename.clone(),
            rx,
        }
    }

    /// Extract the reference's key and register it in the current window.
    ///
    /// Fails with `MalformedReference` if the key extractor rejects the
    /// reference: a configuration error, not a per-key miss.
    pub fn load_ref(&self, reference: &EntityRef) -> Result<PendingLoad> {
        let key = (self.extractor)(reference)?;
        Ok(self.load(key))
    }

    /// Number of `load()` calls waiting in the current window
    pub fn pending(&self) -> usize {
        self.window.lock().expect("loader window lock poisoned").pending.len()
    }

    /// Close the current window and resolve every waiter in it.
    ///
    /// Invokes the batch source exactly once with the deduplicated keys in
    /// first-occurrence order. On success each waiter gets its record (or
    /// the missing marker); on failure every waiter of the window gets the
    /// same `BatchFetchFailed`; no partial success, no retry. A no-op when
    /// the window is empty. A fresh window opens on the next `load()`.
    pub async fn dispatch(&self) {
        let drained = {
            let mut window = self.window.lock().expect("loader window lock poisoned");
            if window.pending.is_empty() {
                return;
            }
            window.state = WindowState::Dispatching;
            std::mem::take(&mut window.pending)
        };

        // Deduplicate, preserving first-occurrence order
        let mut seen = HashSet::new();
        let mut unique: Vec<Key> = Vec::new();
        for (key, _) in &drained {
            if seen.insert(key.clone()) {
                unique.push(key.clone());
            }
        }

        debug!(
            typename = %self.typename,
            waiters = drained.len(),
            keys = unique.len(),
            "dispatching batch fetch"
        );

        match self.source.fetch(&unique, &self.selection).await {
            Ok(records) => {
                let mut by_key: HashMap<Key, Record> = HashMap::with_capacity(records.len());
                for record in records {
                    by_key.insert(record.key.clone(), record);
                }
                for (key, tx) in drained {
                    // Waiter may have been dropped by the caller; ignore
                    let _ = tx.send(Ok(by_key.get(&key).cloned()));
                }
            }
            Err(e) => {
                warn!(typename = %self.typename, error = %e, "batch fetch failed");
                let err = ResolveError::BatchFetchFailed {
                    typename: self.typename.clone(),
                    message: e.to_string(),
                };
                for (_, tx) in drained {
                    let _ = tx.send(Err(err.clone()));
                }
            }
        }

        let mut window = self.window.lock().expect("loader window lock poisoned");
        // Loads issued while the fetch was in flight already belong to the
        // next window.
        window.state = if window.pending.is_empty() {
            WindowState::Idle
        } else {
            WindowState::Collecting
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    use crate::registry::field_key_extractor;

    /// Counting in-memory source: records every fetch's key list and serves
    /// records from a fixed table.
    struct TableSource {
        rows: Vec<Record>,
        calls: AtomicUsize,
        fetched_keys: Mutex<Vec<Vec<Key>>>,
        fail: bool,
    }

    impl TableSource {
        fn new(rows: Vec<Record>) -> Arc<Self> {
            Arc::new(Self {
                rows,
                calls: AtomicUsize::new(0),
                fetched_keys: Mutex::new(Vec::new()),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                rows: Vec::new(),
                calls: AtomicUsize::new(0),
                fetched_keys: Mutex::new(Vec::new()),
                fail: true,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchSource for TableSource {
        async fn fetch(
            &self,
            keys: &[Key],
            _selection: &SelectionSet,
        ) -> anyhow::Result<Vec<Record>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.fetched_keys.lock().unwrap().push(keys.to_vec());
            if self.fail {
                anyhow::bail!("store unavailable");
            }
            // Return in reverse to exercise order restoration
            let mut out: Vec<Record> = self
                .rows
                .iter()
                .filter(|r| keys.contains(&r.key))
                .cloned()
                .collect();
            out.reverse();
            Ok(out)
        }
    }

    fn row(id: &str, name: &str) -> Record {
        let mut fields = serde_json::Map::new();
        fields.insert("id".to_string(), json!(id));
        fields.insert("name".to_string(), json!(name));
        Record::new(id, fields)
    }

    fn make_loader(source: Arc<TableSource>) -> Loader {
        Loader::new(
            "Actor".to_string(),
            SelectionSet::parse("{ id name }").unwrap(),
            field_key_extractor("id"),
            source,
        )
    }

    #[tokio::test]
    async fn single_fetch_per_window_with_deduped_keys() {
        let source = TableSource::new(vec![row("1", "Weaver"), row("2", "Holm")]);
        let loader = make_loader(source.clone());

        let a = loader.load("1".into());
        let b = loader.load("2".into());
        let c = loader.load("1".into());
        assert_eq!(loader.pending(), 3);

        loader.dispatch().await;

        assert_eq!(source.calls(), 1);
        let fetched = source.fetched_keys.lock().unwrap().clone();
        assert_eq!(fetched, vec![vec![Key::from("1"), Key::from("2")]]);

        let a = a.wait().await.unwrap().unwrap();
        let b = b.wait().await.unwrap().unwrap();
        let c = c.wait().await.unwrap().unwrap();
        assert_eq!(a.fields["name"], "Weaver");
        assert_eq!(b.fields["name"], "Holm");
        assert_eq!(a, c);
    }

    #[tokio::test]
    async fn missing_key_resolves_to_sentinel() {
        let source = TableSource::new(vec![row("1", "Weaver")]);
        let loader = make_loader(source);

        let hit = loader.load("1".into());
        let miss = loader.load("999".into());
        loader.dispatch().await;

        assert!(hit.wait().await.unwrap().is_some());
        assert!(miss.wait().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn fetch_failure_reaches_every_waiter() {
        let source = TableSource::failing();
        let loader = make_loader(source.clone());

        let a = loader.load("1".into());
        let b = loader.load("2".into());
        let c = loader.load("1".into());
        loader.dispatch().await;

        let ea = a.wait().await.unwrap_err();
        let eb = b.wait().await.unwrap_err();
        let ec = c.wait().await.unwrap_err();
        assert_eq!(ea, eb);
        assert_eq!(ea, ec);
        assert!(matches!(ea, ResolveError::BatchFetchFailed { .. }));
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn empty_dispatch_is_a_noop() {
        let source = TableSource::new(vec![row("1", "Weaver")]);
        let loader = make_loader(source.clone());
        loader.dispatch().await;
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn windows_repeat() {
        let source = TableSource::new(vec![row("1", "Weaver"), row("2", "Holm")]);
        let loader = make_loader(source.clone());

        let a = loader.load("1".into());
        loader.dispatch().await;
        assert!(a.wait().await.unwrap().is_some());

        // Second window: same key again, fetched again (no cross-window cache)
        let b = loader.load("1".into());
        let c = loader.load("2".into());
        loader.dispatch().await;
        assert!(b.wait().await.unwrap().is_some());
        assert!(c.wait().await.unwrap().is_some());

        assert_eq!(source.calls(), 2);
        let fetched = source.fetched_keys.lock().unwrap().clone();
        assert_eq!(fetched[0], vec![Key::from("1")]);
        assert_eq!(fetched[1], vec![Key::from("1"), Key::from("2")]);
    }

    #[tokio::test]
    async fn dropped_loader_reports_abandoned_window() {
        let source = TableSource::new(vec![]);
        let loader = make_loader(source);
        let pending = loader.load("1".into());
        drop(loader);

        let err = pending.wait().await.unwrap_err();
        assert_eq!(err, ResolveError::WindowAbandoned("Actor".to_string()));
    }

    #[tokio::test]
    async fn load_ref_rejects_missing_key_field() {
        let source = TableSource::new(vec![]);
        let loader = make_loader(source);

        let mut fields = serde_json::Map::new();
        fields.insert("name".to_string(), json!("no id here"));
        let reference = EntityRef::new("Actor", fields);

        let err = loader.load_ref(&reference).unwrap_err();
        assert!(matches!(err, ResolveError::MalformedReference { .. }));
        assert_eq!(loader.pending(), 0);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn dedup_first_occurrence(keys: &[String]) -> Vec<Key> {
            let mut seen = HashSet::new();
            keys.iter()
                .filter(|k| seen.insert((*k).clone()))
                .map(|k| Key::from(k.as_str()))
                .collect()
        }

        proptest! {
            /// Any multiset of keys: one fetch, unique keys in
            /// first-occurrence order, one result slot per load call.
            #[test]
            fn window_invariants(keys in proptest::collection::vec("[a-d][0-9]", 1..40)) {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .build()
                    .unwrap();
                rt.block_on(async {
                    let source = TableSource::new(
                        keys.iter().map(|k| row(k, k)).collect(),
                    );
                    let loader = make_loader(source.clone());

                    let waiters: Vec<_> =
                        keys.iter().map(|k| loader.load(k.as_str().into())).collect();
                    loader.dispatch().await;

                    prop_assert_eq!(source.calls(), 1);
                    let fetched = source.fetched_keys.lock().unwrap().clone();
                    prop_assert_eq!(&fetched[0], &dedup_first_occurrence(&keys));

                    let mut resolved = 0usize;
                    for (key, waiter) in keys.iter().zip(waiters) {
                        let record = waiter.wait().await.unwrap().unwrap();
                        prop_assert_eq!(&record.key, &Key::from(key.as_str()));
                        resolved += 1;
                    }
                    prop_assert_eq!(resolved, keys.len());
                    Ok(())
                })?;
            }
        }
    }
}
