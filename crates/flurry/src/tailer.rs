//! The per-reader tailing cycle.
//!
//! Each cycle runs in three steps:
//!
//! 1. **Claim**: list the container, then under the registry lease learn new
//!    blobs, pick the most overdue blob and record the claim.
//! 2. **Read** (no lease held): fetch one bounded chunk of the claimed blob
//!    and hand its records to the sink.
//! 3. **Commit** (under the registry lease): reload the registry, advance the
//!    blob's offset and release the claim once the blob is drained.
//!
//! The registry is always reloaded under the lease before it is mutated, so
//! progress written by other readers in between is never overwritten.

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use chrono::Utc;
use regex::Regex;
use snafu::prelude::*;
use tracing::{debug, info, warn};

use flurry_core::emit;
use flurry_core::metrics::events::{
    BlobClaimed, BlobsDiscovered, BytesRead, MalformedChunk, PendingBlobs, RecordsEmitted,
};
use flurry_core::polling::{IterationResult, PollingProcessor};
use flurry_core::storage::BlobMeta;

use crate::chunk::{Chunk, ChunkReader};
use crate::config::{Config, CreatePolicy, FramingConfig, SplitPolicy};
use crate::error::{ConfigError, CycleError, ListingSnafu, RegistryError};
use crate::lease::LeaseManager;
use crate::registry::{Registry, RegistryItem, RegistryStore};
use crate::scheduler::{Claim, SchedulePolicy, pending_count, select_next};
use crate::sink::{Record, RecordSink};
use crate::split::{extract_batch, separator_len, trim_leading_separators};
use crate::store::BlobStoreRef;

/// Which blobs of the container a reader tracks.
struct BlobFilter {
    prefix: Option<String>,
    page_size: usize,
    patterns: Vec<Regex>,
    /// Registry and lock objects live in the same container.
    excluded: [String; 2],
}

impl BlobFilter {
    fn tracks(&self, path: &str) -> bool {
        !self.excluded.iter().any(|e| e == path)
            && (self.patterns.is_empty() || self.patterns.iter().any(|p| p.is_match(path)))
    }
}

/// Tails the blobs of one container on behalf of one reader.
pub struct BlobTailer<K: RecordSink> {
    reader_id: String,
    store: BlobStoreRef,
    lease: LeaseManager,
    registry: RegistryStore,
    chunks: ChunkReader,
    sink: K,
    filter: BlobFilter,
    create_policy: CreatePolicy,
    schedule: SchedulePolicy,
    split_policy: SplitPolicy,
    batch_size: usize,
    framing: FramingConfig,
}

impl<K: RecordSink> BlobTailer<K> {
    pub fn new(store: BlobStoreRef, config: &Config, sink: K) -> Result<Self, ConfigError> {
        let reader_id = config.reader.id.clone();
        let lock_path = config.registry.lock_path();
        let split_policy = config.json.split_policy;

        Ok(Self {
            lease: LeaseManager::new(store.clone(), lock_path.clone(), &reader_id, config.lease),
            registry: RegistryStore::new(store.clone(), &config.registry.path),
            chunks: ChunkReader::new(store.clone(), config.framing, split_policy.is_framed()),
            filter: BlobFilter {
                prefix: config.reader.prefix.clone(),
                page_size: config.reader.list_page_size,
                patterns: config.reader.compiled_filters()?,
                excluded: [config.registry.path.clone(), lock_path],
            },
            create_policy: config.registry.create_policy,
            schedule: SchedulePolicy {
                claim_timeout: config.reader.claim_timeout(),
            },
            split_policy,
            batch_size: config.json.batch_size,
            framing: config.framing,
            reader_id,
            store,
            sink,
        })
    }

    pub fn reader_id(&self) -> &str {
        &self.reader_id
    }

    pub fn sink(&self) -> &K {
        &self.sink
    }

    /// List the tracked blobs.
    async fn list(&self) -> Result<Vec<BlobMeta>, CycleError> {
        let blobs = self
            .store
            .list_blobs(self.filter.prefix.as_deref(), self.filter.page_size)
            .await
            .context(ListingSnafu)?;
        Ok(blobs
            .into_iter()
            .filter(|blob| self.filter.tracks(&blob.path))
            .collect())
    }

    async fn claim(&mut self) -> Result<Option<Claim>, CycleError> {
        // Listing can be slow on large containers; keep it out of the lease.
        let blobs = self.list().await?;
        let handle = self.lease.acquire().await?;
        let result = self.claim_locked(&blobs).await;
        self.lease.release(handle).await;
        result
    }

    async fn claim_locked(&mut self, blobs: &[BlobMeta]) -> Result<Option<Claim>, CycleError> {
        let (mut registry, created) = match self.registry.load().await {
            Ok(registry) => (registry, false),
            Err(RegistryError::RegistryNotFound { path }) => {
                info!(
                    target = %self.reader_id,
                    path = %path,
                    blobs = blobs.len(),
                    policy = ?self.create_policy,
                    "Creating registry"
                );
                (Registry::create(blobs, self.create_policy), true)
            }
            Err(e) => return Err(e.into()),
        };

        let discovered = registry.learn(blobs);
        if discovered > 0 {
            info!(target = %self.reader_id, count = discovered, "Discovered new blobs");
            emit!(BlobsDiscovered {
                count: discovered as u64,
                reader: self.reader_id.clone(),
            });
        }
        emit!(PendingBlobs {
            count: pending_count(&registry, blobs),
            reader: self.reader_id.clone(),
        });

        let claim = select_next(
            &mut registry,
            blobs,
            &self.reader_id,
            Utc::now().timestamp(),
            self.schedule,
        );

        if created || discovered > 0 || claim.is_some() {
            self.registry.save(&registry).await?;
        }

        if let Some(claim) = &claim {
            emit!(BlobClaimed {
                reader: self.reader_id.clone(),
            });
            debug!(
                target = %self.reader_id,
                blob = %claim.path,
                offset = claim.offset,
                length = claim.content_length,
                generation = claim.generation,
                "Claimed blob"
            );
        }

        Ok(claim)
    }

    async fn commit(&mut self, chunk: &Chunk, next_offset: u64) -> Result<(), CycleError> {
        let handle = self.lease.acquire().await?;
        let result = self.commit_locked(chunk, next_offset).await;
        self.lease.release(handle).await;
        result
    }

    async fn commit_locked(&mut self, chunk: &Chunk, next_offset: u64) -> Result<(), CycleError> {
        let mut registry = self.registry.load().await?;

        if registry.get(&chunk.path).is_none() {
            warn!(
                target = %self.reader_id,
                blob = %chunk.path,
                "Registry entry vanished while reading, recreating it"
            );
            let blob = BlobMeta {
                path: chunk.path.clone(),
                etag: chunk.etag.clone(),
                content_length: chunk.content_length,
            };
            registry.insert(RegistryItem::new(&blob, 0));
        }

        if let Some(item) = registry.get_mut(&chunk.path) {
            item.offset = item.offset.max(next_offset);
            if !chunk.etag.is_empty() {
                item.etag = chunk.etag.clone();
            }
            if chunk.is_final {
                item.release(&self.reader_id);
            }
        }

        self.registry.save(&registry).await?;
        Ok(())
    }

    /// Hand the chunk's records to the sink.
    ///
    /// Returns how many bytes of `chunk.data` were delivered, and the error
    /// that stopped delivery early, if any.
    async fn deliver(&mut self, chunk: &Chunk) -> (usize, Result<(), CycleError>) {
        match self.split_policy {
            SplitPolicy::DoNotBreak => self.deliver_whole(chunk).await,
            SplitPolicy::WithHeadTail => self.deliver_split(chunk, true).await,
            SplitPolicy::WithoutHeadTail => self.deliver_split(chunk, false).await,
        }
    }

    async fn deliver_whole(&mut self, chunk: &Chunk) -> (usize, Result<(), CycleError>) {
        let len = chunk.data.len();
        if len == 0 {
            return (0, Ok(()));
        }

        // Resumed reads start at the separator left behind by the old tail.
        let head_bytes = self.framing.head_bytes;
        let skip = if head_bytes > 0 && chunk.data_start > head_bytes {
            trim_leading_separators(&chunk.data)
        } else {
            0
        };
        if skip == len {
            return (len, Ok(()));
        }

        let record = Record {
            blob: chunk.path.clone(),
            offset: chunk.data_start + skip as u64,
            data: framed(&chunk.head, chunk.data.slice(skip..), &chunk.tail),
        };
        match self.sink.emit(record).await {
            Ok(()) => {
                self.records_emitted(1);
                (len, Ok(()))
            }
            Err(e) => (0, Err(e.into())),
        }
    }

    async fn deliver_split(
        &mut self,
        chunk: &Chunk,
        with_framing: bool,
    ) -> (usize, Result<(), CycleError>) {
        let data = &chunk.data;
        let closed = chunk.tail_stripped();
        let mut consumed = 0usize;
        let mut emitted = 0u64;

        let outcome = loop {
            consumed += separator_len(&data[consumed..]);
            if consumed >= data.len() {
                break Ok(());
            }

            let base = consumed;
            let batch = match extract_batch(&data[base..], self.batch_size, closed) {
                Ok(Some(batch)) => batch,
                Ok(None) => break Ok(()),
                Err(source) => {
                    warn!(
                        target = %self.reader_id,
                        blob = %chunk.path,
                        offset = chunk.data_start + base as u64,
                        error = %source,
                        "Malformed JSON in chunk"
                    );
                    emit!(MalformedChunk {
                        reader: self.reader_id.clone(),
                    });
                    break Err(CycleError::Split {
                        path: chunk.path.clone(),
                        source,
                    });
                }
            };

            if with_framing {
                let span = batch.span();
                let record = Record {
                    blob: chunk.path.clone(),
                    offset: chunk.data_start + (base + span.start) as u64,
                    data: framed(
                        &chunk.head,
                        data.slice(base + span.start..base + span.end),
                        &chunk.tail,
                    ),
                };
                if let Err(e) = self.sink.emit(record).await {
                    break Err(e.into());
                }
                emitted += 1;
                consumed = base + batch.consumed;
                continue;
            }

            let mut failed = None;
            for object in &batch.objects {
                let record = Record {
                    blob: chunk.path.clone(),
                    offset: chunk.data_start + (base + object.start) as u64,
                    data: data.slice(base + object.start..base + object.end),
                };
                if let Err(e) = self.sink.emit(record).await {
                    failed = Some(e);
                    break;
                }
                emitted += 1;
                consumed = base + object.end;
            }
            if let Some(e) = failed {
                break Err(e.into());
            }
        };

        self.records_emitted(emitted);
        (consumed, outcome)
    }

    fn records_emitted(&self, count: u64) {
        if count > 0 {
            emit!(RecordsEmitted {
                count,
                reader: self.reader_id.clone(),
            });
        }
    }

    /// Drop every claim this reader holds.
    async fn release_claims(&mut self) -> Result<(), CycleError> {
        let handle = self.lease.acquire().await?;
        let result = self.release_claims_locked().await;
        self.lease.release(handle).await;
        result
    }

    async fn release_claims_locked(&mut self) -> Result<(), CycleError> {
        let mut registry = match self.registry.load().await {
            Ok(registry) => registry,
            Err(RegistryError::RegistryNotFound { .. }) => return Ok(()),
            Err(e) => return Err(e.into()),
        };

        let released = registry.release_all(&self.reader_id);
        if released > 0 {
            self.registry.save(&registry).await?;
            info!(target = %self.reader_id, count = released, "Released claims");
        }
        Ok(())
    }
}

/// Wrap `body` in the blob's framing.
fn framed(head: &Bytes, body: Bytes, tail: &Bytes) -> Bytes {
    if head.is_empty() && tail.is_empty() {
        return body;
    }
    let mut buf = BytesMut::with_capacity(head.len() + body.len() + tail.len());
    buf.extend_from_slice(head);
    buf.extend_from_slice(&body);
    buf.extend_from_slice(tail);
    buf.freeze()
}

#[async_trait]
impl<K: RecordSink> PollingProcessor for BlobTailer<K> {
    type State = Claim;
    type Error = CycleError;

    async fn prepare(&mut self, cold_start: bool) -> Result<Option<Self::State>, Self::Error> {
        if cold_start {
            info!(
                target = %self.reader_id,
                registry = %self.registry.path(),
                lease = self.lease.is_enabled(),
                "Cold start"
            );
        }
        self.claim().await
    }

    async fn process(&mut self, claim: Self::State) -> Result<IterationResult, Self::Error> {
        let chunk = self
            .chunks
            .read(&claim.path, claim.offset, claim.content_length)
            .await?;
        emit!(BytesRead {
            bytes: chunk.data.len() as u64,
            reader: self.reader_id.clone(),
        });

        let (consumed, delivered) = self.deliver(&chunk).await;
        let next_offset = chunk.next_offset(consumed);

        self.commit(&chunk, next_offset).await?;
        if chunk.is_final {
            self.chunks.forget(&chunk.path);
        }
        delivered?;

        debug!(
            target = %self.reader_id,
            blob = %chunk.path,
            from = claim.offset,
            to = next_offset,
            length = chunk.content_length,
            "Committed offset"
        );

        if chunk.is_final {
            return Ok(IterationResult::Drained);
        }
        if next_offset <= claim.offset {
            warn!(
                target = %self.reader_id,
                blob = %chunk.path,
                offset = claim.offset,
                max_buffer_size = self.framing.max_buffer_size,
                "No complete record fits in one chunk"
            );
            return Ok(IterationResult::Drained);
        }
        Ok(IterationResult::MoreData)
    }

    fn failure_kind(error: &Self::Error) -> &'static str {
        error.kind()
    }

    async fn on_shutdown(&mut self) -> Result<(), Self::Error> {
        self.release_claims().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};

    use flurry_core::storage::{LeaseHandle, StorageProvider};

    use crate::error::{LeaseError, StorageError};
    use crate::sink::{ChannelSink, VecSink};
    use crate::store::BlobStore;

    const REGISTRY: &str = "data/registry.dat";
    const LOCK: &str = "data/registry.dat.lock";

    fn config(extra: &str) -> Config {
        let yaml = format!(
            "storage:\n  backend: memory\n\
             registry:\n  create_policy: start_over\n\
             reader:\n  id: r1\n\
             lease:\n  retry_interval_ms: 10\n{extra}"
        );
        Config::parse(&yaml).unwrap()
    }

    fn tailer(storage: &Arc<StorageProvider>, extra: &str) -> BlobTailer<VecSink> {
        BlobTailer::new(storage.clone(), &config(extra), VecSink::default()).unwrap()
    }

    async fn put(storage: &StorageProvider, path: &str, content: &str) {
        BlobStore::put(storage, path, Bytes::from(content.to_string()))
            .await
            .unwrap();
    }

    async fn cycle<K: RecordSink>(
        tailer: &mut BlobTailer<K>,
    ) -> Result<IterationResult, CycleError> {
        match tailer.prepare(false).await? {
            Some(claim) => tailer.process(claim).await,
            None => Ok(IterationResult::NoItems),
        }
    }

    async fn registry(storage: &Arc<StorageProvider>) -> Registry {
        RegistryStore::new(storage.clone(), REGISTRY).load().await.unwrap()
    }

    fn texts(tailer: &BlobTailer<VecSink>) -> Vec<String> {
        tailer
            .sink()
            .records
            .iter()
            .map(|r| String::from_utf8(r.data.to_vec()).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_whole_chunk_delivery() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "line one\nline two\n").await;
        let mut tailer = tailer(&storage, "");

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec!["line one\nline two\n"]);

        let item = registry(&storage).await.get("a.log").cloned().unwrap();
        assert_eq!(item.offset, 18);
        assert!(item.owner.is_none());
        assert!(registry(&storage).await.get(REGISTRY).is_none());

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::NoItems);
    }

    #[tokio::test]
    async fn test_objects_without_framing_across_appends() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", r#"{"records":[{"a":1},{"b":2}]}"#).await;
        let mut tailer = tailer(
            &storage,
            "framing:\n  head_bytes: 12\n  tail_bytes: 2\njson:\n  split_policy: without_head_tail\n",
        );

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec![r#"{"a":1}"#, r#"{"b":2}"#]);
        assert_eq!(tailer.sink().records[0].offset, 12);
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 29);

        // The writer replaces the tail with new content and a new tail.
        put(&storage, "a.json", r#"{"records":[{"a":1},{"b":2},{"c":3}]}"#).await;

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer)[2], r#"{"c":3}"#);
        assert_eq!(tailer.sink().records[2].offset, 28);
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 37);
    }

    #[tokio::test]
    async fn test_batches_wrapped_in_framing() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", r#"{"records":[{"a":1},{"b":2},{"c":3}]}"#).await;
        let mut tailer = tailer(
            &storage,
            "framing:\n  head_bytes: 12\n  tail_bytes: 2\njson:\n  split_policy: with_head_tail\n  batch_size: 2\n",
        );

        cycle(&mut tailer).await.unwrap();

        assert_eq!(
            texts(&tailer),
            vec![
                r#"{"records":[{"a":1},{"b":2}]}"#,
                r#"{"records":[{"c":3}]}"#
            ]
        );
    }

    #[tokio::test]
    async fn test_bounded_chunks_report_more_data() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", "{\"a\":1}\n{\"b\":2}\n{\"c\":3}\n").await;
        let mut tailer = tailer(
            &storage,
            "framing:\n  max_buffer_size: 16\njson:\n  split_policy: without_head_tail\n",
        );

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::MoreData);
        let item = registry(&storage).await.get("a.json").cloned().unwrap();
        assert_eq!(item.offset, 16);
        assert_eq!(item.owner.as_deref(), Some("r1"));

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec![r#"{"a":1}"#, r#"{"b":2}"#, r#"{"c":3}"#]);
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 24);
    }

    #[tokio::test]
    async fn test_window_ending_inside_tail_is_not_malformed() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", "{\"r\":[{\"a\":1},{\"bb\":2}]}\n").await;
        let mut tailer = tailer(
            &storage,
            "framing:\n  head_bytes: 6\n  tail_bytes: 3\n  max_buffer_size: 18\n\
             json:\n  split_policy: without_head_tail\n",
        );

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec![r#"{"a":1}"#, r#"{"bb":2}"#]);
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 25);
    }

    #[tokio::test]
    async fn test_oversized_object_does_not_spin() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", r#"{"a":"0123456789abcdef"}"#).await;
        let mut tailer = tailer(
            &storage,
            "framing:\n  max_buffer_size: 8\njson:\n  split_policy: without_head_tail\n",
        );

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert!(tailer.sink().records.is_empty());
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 0);
    }

    #[tokio::test]
    async fn test_malformed_chunk_commits_progress() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.json", r#"{"a":1}}{"b":2}"#).await;
        let mut tailer = tailer(&storage, "json:\n  split_policy: without_head_tail\n");

        let err = cycle(&mut tailer).await.unwrap_err();

        assert_eq!(err.kind(), "malformed_structure");
        assert_eq!(texts(&tailer), vec![r#"{"a":1}"#]);
        assert_eq!(registry(&storage).await.get("a.json").unwrap().offset, 7);
        assert!(storage.read_lease(LOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_closed_sink_keeps_offset() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "hello\n").await;
        let (sink, rx) = ChannelSink::channel(1);
        drop(rx);
        let mut tailer = BlobTailer::new(storage.clone(), &config(""), sink).unwrap();

        let err = cycle(&mut tailer).await.unwrap_err();

        assert_eq!(err.kind(), "sink");
        assert_eq!(registry(&storage).await.get("a.log").unwrap().offset, 0);
        assert!(storage.read_lease(LOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_corrupt_registry_on_claim_releases_lease() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "hello\n").await;
        put(&storage, REGISTRY, "not a registry").await;
        let mut tailer = tailer(&storage, "");

        let err = cycle(&mut tailer).await.unwrap_err();

        assert_eq!(err.kind(), "registry_corrupt");
        assert!(tailer.sink().records.is_empty());
        assert!(storage.read_lease(LOCK).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_commit_releases_lease() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "hello\n").await;
        let mut tailer = tailer(&storage, "");

        let claim = tailer.prepare(false).await.unwrap().unwrap();
        put(&storage, REGISTRY, "[]").await;

        let err = tailer.process(claim).await.unwrap_err();

        assert_eq!(err.kind(), "registry_corrupt");
        assert_eq!(texts(&tailer), vec!["hello\n"]);
        assert!(storage.read_lease(LOCK).await.unwrap().is_none());
    }

    /// Records whether the registry lease was held while the container was listed.
    struct LockWatchingStore {
        inner: Arc<StorageProvider>,
        listed_under_lease: AtomicBool,
    }

    #[async_trait]
    impl BlobStore for LockWatchingStore {
        async fn list_blobs(
            &self,
            prefix: Option<&str>,
            page_size: usize,
        ) -> Result<Vec<BlobMeta>, StorageError> {
            if matches!(self.inner.read_lease(LOCK).await, Ok(Some(_))) {
                self.listed_under_lease.store(true, Ordering::SeqCst);
            }
            self.inner.list_blobs(prefix, page_size).await
        }

        async fn get_range(
            &self,
            path: &str,
            range: std::ops::Range<u64>,
        ) -> Result<(BlobMeta, Bytes), StorageError> {
            self.inner.get_range(path, range).await
        }

        async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
            self.inner.get(path).await
        }

        async fn put(&self, path: &str, bytes: Bytes) -> Result<(), StorageError> {
            self.inner.put(path, bytes).await
        }

        async fn acquire_lease(
            &self,
            path: &str,
            holder: &str,
            duration: Option<std::time::Duration>,
        ) -> Result<LeaseHandle, LeaseError> {
            self.inner.acquire_lease(path, holder, duration).await
        }

        async fn release_lease(&self, handle: &LeaseHandle) -> Result<bool, LeaseError> {
            self.inner.release_lease(handle).await
        }

        async fn break_lease(&self, path: &str) -> Result<(), LeaseError> {
            self.inner.break_lease(path).await
        }
    }

    #[tokio::test]
    async fn test_listing_runs_outside_the_lease() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "hello\n").await;
        let store = Arc::new(LockWatchingStore {
            inner: storage.clone(),
            listed_under_lease: AtomicBool::new(false),
        });
        let mut tailer = BlobTailer::new(store.clone(), &config(""), VecSink::default()).unwrap();

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec!["hello\n"]);
        assert!(!store.listed_under_lease.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_shutdown_releases_claims() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "a.log", "0123456789").await;
        let mut tailer = tailer(&storage, "framing:\n  max_buffer_size: 4\n");

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::MoreData);
        assert_eq!(
            registry(&storage).await.get("a.log").unwrap().owner.as_deref(),
            Some("r1")
        );

        tailer.on_shutdown().await.unwrap();
        assert!(registry(&storage).await.get("a.log").unwrap().owner.is_none());
    }

    #[tokio::test]
    async fn test_path_filters_and_prefix() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "logs/a.json", "{}").await;
        put(&storage, "logs/b.txt", "x").await;
        put(&storage, "other/c.json", "{}").await;
        let mut tailer = tailer(&storage, "json:\n  batch_size: 1\n");
        tailer.filter.prefix = Some("logs".to_string());
        tailer.filter.patterns = vec![Regex::new(r"\.json$").unwrap()];

        cycle(&mut tailer).await.unwrap();

        let registry = registry(&storage).await;
        assert_eq!(registry.len(), 1);
        assert!(registry.get("logs/a.json").is_some());
    }

    #[tokio::test]
    async fn test_cycle_metrics_recorded() {
        flurry_core::init_metrics_test();
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "m.log", "metric line\n").await;

        let mut config = config("");
        config.reader.id = "metrics-reader".to_string();
        let mut tailer = BlobTailer::new(storage.clone(), &config, VecSink::default()).unwrap();
        cycle(&mut tailer).await.unwrap();

        let output = flurry_core::MetricsController::get().unwrap().render();
        assert!(output.contains("flurry_records_emitted_total{reader=\"metrics-reader\"}"));
        assert!(output.contains("flurry_bytes_read_total{reader=\"metrics-reader\"}"));
        assert!(output.contains("flurry_lease_acquired_total{reader=\"metrics-reader\"}"));
    }

    #[tokio::test]
    async fn test_resume_policy_skips_existing_content() {
        let storage = Arc::new(StorageProvider::in_memory());
        put(&storage, "old.log", "already there\n").await;
        let config = Config::parse(
            "storage:\n  backend: memory\nreader:\n  id: r1\nregistry:\n  create_policy: resume\n",
        )
        .unwrap();
        let mut tailer = BlobTailer::new(storage.clone(), &config, VecSink::default()).unwrap();

        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::NoItems);

        put(&storage, "new.log", "fresh\n").await;
        assert_eq!(cycle(&mut tailer).await.unwrap(), IterationResult::Drained);
        assert_eq!(texts(&tailer), vec!["fresh\n"]);
    }
}
