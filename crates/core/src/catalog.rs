//! Lazily paginated view over a remote record stream with cached, coalesced link
//! resolution.
//!
//! Records and their link slots are append-only: `records()[i]` keeps its meaning
//! until `clear()`. Slot transitions happen under the state mutex, and no lock is held
//! while a remote call is outstanding.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use serde::Serialize;
use tracing::{debug, info};

use crate::error::CatalogError;
use crate::filter::RecordFilter;
use crate::model::{CatalogRecord, Cursor, LinkSlot, Page};
use crate::pool::TaskPool;

/// Remote collaborator backing a catalog.
#[async_trait]
pub trait RecordSource: Send + Sync + 'static {
    /// Record type listed by this source.
    type Record: CatalogRecord;

    /// Fetch one page. `cursor` is `None` for the first page.
    async fn list_records(&self, cursor: Option<&str>) -> anyhow::Result<Page<Self::Record>>;

    /// Fetch the derived link (e.g. a log url) of one record.
    async fn resolve_link(&self, record_id: &str) -> anyhow::Result<String>;
}

/// Outcome of [`RemoteCatalog::resolve_link`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkLookup {
    /// The record's link, cached or freshly fetched.
    Resolved(String),
    /// Another caller's resolution for this record is outstanding. Nothing was sent;
    /// ask again later.
    InProgress,
}

impl LinkLookup {
    /// The url, unless the lookup is still in progress.
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Resolved(url) => Some(url),
            Self::InProgress => None,
        }
    }
}

/// A link produced by [`RemoteCatalog::bulk_resolve`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedLink {
    /// Position in [`RemoteCatalog::records`].
    pub index: usize,
    /// Resolved link.
    pub url: String,
}

/// Records fetched so far from a [`RecordSource`], plus one [`LinkSlot`] per record.
pub struct RemoteCatalog<S: RecordSource> {
    shared: Arc<Shared<S>>,
    filter: Option<Arc<dyn RecordFilter<S::Record>>>,
    /// Serializes `load_next` and `clear`.
    page_lock: tokio::sync::Mutex<()>,
}

struct Shared<S: RecordSource> {
    source: S,
    state: Mutex<State<S::Record>>,
}

struct State<R> {
    records: Vec<R>,
    slots: Vec<LinkSlot>,
    cursor: Cursor,
    /// Bumped by `clear`; late resolutions from an older generation are dropped.
    generation: u64,
}

impl<R> Default for State<R> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            slots: Vec::new(),
            cursor: Cursor::NotYetLoaded,
            generation: 0,
        }
    }
}

impl<S: RecordSource> RemoteCatalog<S> {
    /// Empty catalog; nothing is fetched until [`Self::load_next`].
    pub fn new(source: S) -> Self {
        Self {
            shared: Arc::new(Shared {
                source,
                state: Mutex::new(State::default()),
            }),
            filter: None,
            page_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Apply `filter` to every page loaded through [`Self::load_next`].
    pub fn with_filter<F>(mut self, filter: F) -> Self
    where
        F: RecordFilter<S::Record> + 'static,
    {
        self.filter = Some(Arc::new(filter));
        self
    }

    /// The backing source.
    pub fn source(&self) -> &S {
        &self.shared.source
    }

    /// Load the next page through the catalog's filter, if any.
    ///
    /// Returns how many records were appended, which may be zero when the filter
    /// rejects the whole page.
    pub async fn load_next(&self) -> Result<usize, CatalogError> {
        let filter = self.filter.clone();
        self.load_page(filter.as_deref()).await
    }

    /// Load the next page, keeping only records accepted by `filter`.
    pub async fn load_next_with<F>(&self, filter: &F) -> Result<usize, CatalogError>
    where
        F: RecordFilter<S::Record>,
    {
        self.load_page(Some(filter as &dyn RecordFilter<S::Record>)).await
    }

    async fn load_page(
        &self,
        filter: Option<&dyn RecordFilter<S::Record>>,
    ) -> Result<usize, CatalogError> {
        let _page = self.page_lock.lock().await;

        let cursor = self.shared.lock().cursor.clone();
        if cursor == Cursor::EndOfStream {
            return Err(CatalogError::NoMorePages);
        }

        let page = self
            .shared
            .source
            .list_records(cursor.token())
            .await
            .map_err(CatalogError::remote)?;

        let fetched = page.records.len();
        let kept: Vec<S::Record> = page
            .records
            .into_iter()
            .filter(|r| filter.map_or(true, |f| f.matches(r)))
            .collect();
        let appended = kept.len();

        let mut guard = self.shared.lock();
        let state = &mut *guard;
        state.records.extend(kept);
        state.slots.resize(state.records.len(), LinkSlot::Unresolved);
        state.cursor = Cursor::after(page.next_token);

        debug!(
            fetched,
            appended,
            total = state.records.len(),
            has_more = state.cursor.has_more(),
            "loaded page"
        );
        Ok(appended)
    }

    /// Resolve the link of the record at `index`.
    ///
    /// A cached link is returned without a remote call. If another caller is already
    /// resolving the same record this returns [`LinkLookup::InProgress`] at once
    /// instead of issuing a second call or waiting. A failed call leaves the slot
    /// `Unresolved`, so calling again retries.
    pub async fn resolve_link(&self, index: usize) -> Result<LinkLookup, CatalogError> {
        match self.shared.resolve(index, None).await? {
            Attempt::Done(lookup) => Ok(lookup),
            // Only pinned attempts go stale.
            Attempt::Stale => Ok(LinkLookup::InProgress),
        }
    }

    /// Resolve every currently unresolved record, at most `concurrency` at a time.
    ///
    /// Individual failures are logged and leave their slot `Unresolved`. Returns the
    /// links resolved by this pass, ordered by index. If the catalog is cleared
    /// mid-pass, the remaining work is skipped and links for the old records are
    /// not returned.
    pub async fn bulk_resolve(&self, concurrency: usize) -> Result<Vec<ResolvedLink>, CatalogError> {
        let pool = TaskPool::new(concurrency)?;

        let (unresolved, generation) = {
            let state = self.shared.lock();
            let unresolved: Vec<usize> = state
                .slots
                .iter()
                .enumerate()
                .filter(|(_, slot)| **slot == LinkSlot::Unresolved)
                .map(|(index, _)| index)
                .collect();
            (unresolved, state.generation)
        };
        let requested = unresolved.len();

        for index in unresolved {
            let shared = Arc::clone(&self.shared);
            pool.add_task(async move {
                match shared.resolve(index, Some(generation)).await {
                    Ok(Attempt::Done(LinkLookup::Resolved(url))) => {
                        Ok(Some(ResolvedLink { index, url }))
                    }
                    Ok(Attempt::Done(LinkLookup::InProgress)) | Ok(Attempt::Stale) => Ok(None),
                    Err(e) => Err(anyhow::Error::new(e).context(format!("resolving record {index}"))),
                }
            });
        }

        let mut links: Vec<ResolvedLink> = pool.run_all().await?.into_iter().flatten().collect();
        links.sort_by_key(|link| link.index);

        info!(requested, resolved = links.len(), concurrency, "bulk resolve finished");
        Ok(links)
    }

    /// Drop every record and start over from the first page.
    ///
    /// Waits for an in-flight page load. Resolutions still outstanding complete for
    /// their caller but are not cached.
    pub async fn clear(&self) {
        let _page = self.page_lock.lock().await;
        let mut state = self.shared.lock();
        let generation = state.generation + 1;
        *state = State {
            generation,
            ..State::default()
        };
        debug!(generation, "catalog cleared");
    }

    /// Number of records loaded.
    pub fn len(&self) -> usize {
        self.shared.lock().records.len()
    }

    /// True before the first non-empty page.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the loaded records, in arrival order.
    pub fn records(&self) -> Vec<S::Record> {
        self.shared.lock().records.clone()
    }

    /// Record at `index`, if loaded.
    pub fn record(&self, index: usize) -> Option<S::Record> {
        self.shared.lock().records.get(index).cloned()
    }

    /// Link slot of the record at `index`.
    pub fn slot(&self, index: usize) -> Option<LinkSlot> {
        self.shared.lock().slots.get(index).cloned()
    }

    /// Snapshot of every link slot, same indices as [`Self::records`].
    pub fn slots(&self) -> Vec<LinkSlot> {
        self.shared.lock().slots.clone()
    }

    /// Position in the remote stream.
    pub fn cursor(&self) -> Cursor {
        self.shared.lock().cursor.clone()
    }

    /// False once the remote reported the end of the stream.
    pub fn has_more(&self) -> bool {
        self.shared.lock().cursor.has_more()
    }
}

impl<S: RecordSource> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, State<S::Record>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Resolve one slot. With `pinned`, the attempt belongs to that generation: it
    /// claims nothing once the catalog has been cleared and reports a late result as
    /// stale instead of returning it.
    async fn resolve(&self, index: usize, pinned: Option<u64>) -> Result<Attempt, CatalogError> {
        let (record_id, generation) = {
            let mut guard = self.lock();
            let state = &mut *guard;
            if pinned.is_some_and(|g| g != state.generation) {
                return Ok(Attempt::Stale);
            }
            let len = state.records.len();
            let slot = state
                .slots
                .get_mut(index)
                .ok_or(CatalogError::IndexOutOfRange { index, len })?;
            match *slot {
                LinkSlot::Resolved(ref url) => {
                    return Ok(Attempt::Done(LinkLookup::Resolved(url.clone())))
                }
                LinkSlot::Resolving => return Ok(Attempt::Done(LinkLookup::InProgress)),
                LinkSlot::Unresolved => {}
            }
            *slot = LinkSlot::Resolving;
            (state.records[index].id().to_string(), state.generation)
        };

        // Puts the slot back to `Unresolved` if the call fails or this future is dropped.
        let mut claim = Claim {
            shared: self,
            index,
            generation,
            armed: true,
        };

        debug!(index, record_id = %record_id, "resolving link");
        let url = self
            .source
            .resolve_link(&record_id)
            .await
            .map_err(CatalogError::remote)?;

        claim.armed = false;
        let mut state = self.lock();
        if state.generation == generation {
            state.slots[index] = LinkSlot::Resolved(url.clone());
        } else {
            debug!(index, "catalog cleared while resolving; link not cached");
            if pinned.is_some() {
                return Ok(Attempt::Stale);
            }
        }
        Ok(Attempt::Done(LinkLookup::Resolved(url)))
    }
}

enum Attempt {
    Done(LinkLookup),
    /// The catalog was cleared since the attempt was pinned.
    Stale,
}

/// Ownership of a slot in the `Resolving` state.
struct Claim<'a, S: RecordSource> {
    shared: &'a Shared<S>,
    index: usize,
    generation: u64,
    armed: bool,
}

impl<S: RecordSource> Drop for Claim<'_, S> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut state = self.shared.lock();
        if state.generation == self.generation {
            if let Some(slot) = state.slots.get_mut(self.index) {
                *slot = LinkSlot::Unresolved;
            }
        }
    }
}
