// Vector store module
// One index per document fingerprint, remote backend with local fallback

pub mod local;
pub mod remote;


use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::document::{DocumentFingerprint, Passage, PassageId};
use crate::embeddings::EmbeddingProvider;
use crate::retrieval::{RetrievalResult, ScoredPassage};
use crate::{QaError, Result};

pub use local::LocalBackend;
pub use remote::{PineconeClient, RemoteMatch, RemoteVector};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Local,
    Remote,
}

/// Searchable vectors for one document.
///
/// The local backend always holds every vector, so a remote failure can be
/// absorbed at any point without re-embedding.
#[derive(Debug)]
pub struct DocumentIndex {
    fingerprint: DocumentFingerprint,
    passages: Vec<Passage>,
    positions: HashMap<PassageId, usize>,
    local: LocalBackend,
    remote: Option<Arc<PineconeClient>>,
    remote_active: AtomicBool,
    model: String,
    dimension: usize,
    built_at: DateTime<Utc>,
    generation: u64,
}

pub type IndexHandle = Arc<DocumentIndex>;

impl DocumentIndex {
    #[inline]
    pub fn fingerprint(&self) -> &DocumentFingerprint {
        &self.fingerprint
    }

    #[inline]
    pub fn passages(&self) -> &[Passage] {
        &self.passages
    }

    #[inline]
    pub fn passage_count(&self) -> usize {
        self.passages.len()
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    #[inline]
    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    #[inline]
    pub fn active_backend(&self) -> BackendKind {
        if self.remote.is_some() && self.remote_active.load(Ordering::Acquire) {
            BackendKind::Remote
        } else {
            BackendKind::Local
        }
    }

    #[inline]
    pub fn summary(&self) -> IndexSummary {
        IndexSummary {
            fingerprint: self.fingerprint.clone(),
            passages: self.passages.len(),
            backend: self.active_backend(),
            model: self.model.clone(),
            dimension: self.dimension,
            built_at: self.built_at,
        }
    }

    fn namespace(&self) -> &str {
        self.fingerprint.as_str()
    }

    fn scored(&self, position: usize, score: f32) -> Option<ScoredPassage> {
        self.passages.get(position).map(|passage| ScoredPassage {
            passage: passage.clone(),
            score,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexSummary {
    pub fingerprint: DocumentFingerprint,
    pub passages: usize,
    pub backend: BackendKind,
    pub model: String,
    pub dimension: usize,
    pub built_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreStatus {
    pub preferred_backend: BackendKind,
    pub indexes: Vec<IndexSummary>,
    pub degraded_builds: u64,
    pub degraded_queries: u64,
}

type IndexSlot = Arc<OnceCell<IndexHandle>>;

pub struct VectorStore {
    embedder: Arc<dyn EmbeddingProvider>,
    remote: Option<Arc<PineconeClient>>,
    indexes: Mutex<HashMap<DocumentFingerprint, IndexSlot>>,
    max_cached_indexes: usize,
    generation: AtomicU64,
    degraded_builds: AtomicU64,
    degraded_queries: AtomicU64,
}

impl VectorStore {
    #[inline]
    pub fn new(embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self {
            embedder,
            remote: None,
            indexes: Mutex::new(HashMap::new()),
            max_cached_indexes: 0,
            generation: AtomicU64::new(0),
            degraded_builds: AtomicU64::new(0),
            degraded_queries: AtomicU64::new(0),
        }
    }

    /// Prefer `client` for new indexes, keeping the local backend as fallback
    #[inline]
    pub fn with_remote(mut self, client: PineconeClient) -> Self {
        self.remote = Some(Arc::new(client));
        self
    }

    /// Keep at most `limit` indexes alive, evicting the oldest-built; 0 keeps all
    #[inline]
    pub fn with_max_cached_indexes(mut self, limit: usize) -> Self {
        self.max_cached_indexes = limit;
        self
    }

    #[inline]
    pub fn embedder(&self) -> Arc<dyn EmbeddingProvider> {
        Arc::clone(&self.embedder)
    }

    #[inline]
    pub fn preferred_backend(&self) -> BackendKind {
        if self.remote.is_some() {
            BackendKind::Remote
        } else {
            BackendKind::Local
        }
    }

    /// Return the index for `fingerprint`, building it on first use.
    ///
    /// Concurrent calls for the same fingerprint share a single build. A failed
    /// build leaves nothing behind, so a later call starts over.
    #[inline]
    pub async fn build(
        &self,
        fingerprint: &DocumentFingerprint,
        passages: &[Passage],
    ) -> Result<IndexHandle> {
        if passages.is_empty() {
            return Err(QaError::Ingestion(format!(
                "document {} has no passages",
                fingerprint.short()
            )));
        }

        let slot = {
            let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(indexes.entry(fingerprint.clone()).or_default())
        };

        let result = slot
            .get_or_try_init(|| self.build_index(fingerprint, passages))
            .await
            .cloned();

        match result {
            Ok(handle) => {
                self.evict_excess(fingerprint).await;
                Ok(handle)
            }
            Err(e) => {
                let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
                if indexes
                    .get(fingerprint)
                    .is_some_and(|current| Arc::ptr_eq(current, &slot) && !current.initialized())
                {
                    indexes.remove(fingerprint);
                }
                Err(e)
            }
        }
    }

    /// Existing index for `fingerprint`, without building
    #[inline]
    pub fn get(&self, fingerprint: &DocumentFingerprint) -> Option<IndexHandle> {
        let indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
        indexes.get(fingerprint).and_then(|slot| slot.get().cloned())
    }

    /// Top `k` passages for `query`. A failing remote query, or one that comes
    /// back with fewer usable matches than `k`, switches the index to its local
    /// backend for good.
    #[inline]
    pub async fn search(
        &self,
        handle: &IndexHandle,
        query: &[f32],
        k: usize,
    ) -> Result<RetrievalResult> {
        if query.len() != handle.dimension {
            return Err(QaError::DimensionMismatch {
                expected: handle.dimension,
                actual: query.len(),
            });
        }

        let k = k.min(handle.passage_count());
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        if let (BackendKind::Remote, Some(client)) = (handle.active_backend(), &handle.remote) {
            let namespace = handle.namespace().to_string();
            let vector = query.to_vec();
            let outcome = run_remote(client, move |c| c.query(&namespace, &vector, k))
                .await
                .and_then(|matches| {
                    let candidates = matches.into_iter().filter_map(|m| {
                        let position = handle.positions.get(&PassageId::from(m.id))?;
                        handle.scored(*position, m.score.clamp(-1.0, 1.0))
                    });
                    let result = RetrievalResult::ranked(candidates, k);
                    // a lagging or foreign namespace answers short
                    if result.len() < k {
                        return Err(QaError::BackendUnavailable(format!(
                            "remote returned {} usable matches, expected {}",
                            result.len(),
                            k
                        )));
                    }
                    Ok(result)
                });

            match outcome {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if handle.remote_active.swap(false, Ordering::AcqRel) {
                        self.degraded_queries.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Remote query failed for {}, using local index from now on: {}",
                            handle.fingerprint.short(),
                            e
                        );
                    }
                }
            }
        }

        let candidates = handle
            .local
            .search(query, k)?
            .into_iter()
            .filter_map(|(position, score)| handle.scored(position, score));
        Ok(RetrievalResult::ranked(candidates, k))
    }

    /// Drop the index for `fingerprint`; returns whether one existed.
    /// The remote namespace is deleted on a best-effort basis.
    #[inline]
    pub async fn invalidate(&self, fingerprint: &DocumentFingerprint) -> bool {
        let removed = {
            let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
            indexes.remove(fingerprint)
        };

        match removed.and_then(|slot| slot.get().cloned()) {
            Some(handle) => {
                info!("Invalidated index {}", fingerprint.short());
                release_remote(&handle).await;
                true
            }
            None => false,
        }
    }

    #[inline]
    pub fn status(&self) -> StoreStatus {
        let mut indexes: Vec<IndexSummary> = {
            let indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
            indexes
                .values()
                .filter_map(|slot| slot.get().map(|handle| handle.summary()))
                .collect()
        };
        indexes.sort_by(|a, b| a.built_at.cmp(&b.built_at));

        StoreStatus {
            preferred_backend: self.preferred_backend(),
            indexes,
            degraded_builds: self.degraded_builds.load(Ordering::Relaxed),
            degraded_queries: self.degraded_queries.load(Ordering::Relaxed),
        }
    }

    async fn build_index(
        &self,
        fingerprint: &DocumentFingerprint,
        passages: &[Passage],
    ) -> Result<IndexHandle> {
        if let Some(stray) = passages.iter().find(|p| &p.document != fingerprint) {
            return Err(QaError::Ingestion(format!(
                "passage {} does not belong to document {}",
                stray.id,
                fingerprint.short()
            )));
        }

        let dimension = self.embedder.dimension();
        let batch_size = self.embedder.max_batch_size().max(1);
        info!(
            "Building index {} ({} passages, model {})",
            fingerprint.short(),
            passages.len(),
            self.embedder.model()
        );

        let mut local = LocalBackend::with_capacity(dimension, passages.len());
        let mut vectors = Vec::with_capacity(passages.len());

        for batch in passages.chunks(batch_size) {
            let texts: Vec<String> = batch.iter().map(|p| p.text.clone()).collect();
            let embedded = self.embedder.embed(&texts).await?;

            if embedded.len() != batch.len() {
                return Err(QaError::Embedding(format!(
                    "provider returned {} vectors for {} passages",
                    embedded.len(),
                    batch.len()
                )));
            }

            for vector in embedded {
                local.insert(&vector)?;
                vectors.push(vector);
            }
        }

        let remote = match &self.remote {
            Some(client) => match populate_remote(client, fingerprint, passages, vectors, dimension)
                .await
            {
                Ok(()) => Some(Arc::clone(client)),
                Err(e) => {
                    self.degraded_builds.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Remote index unavailable for {}, falling back to local: {}",
                        fingerprint.short(),
                        e
                    );
                    None
                }
            },
            None => None,
        };

        let positions = passages
            .iter()
            .enumerate()
            .map(|(position, p)| (p.id.clone(), position))
            .collect();

        let index = DocumentIndex {
            fingerprint: fingerprint.clone(),
            passages: passages.to_vec(),
            positions,
            local,
            remote_active: AtomicBool::new(remote.is_some()),
            remote,
            model: self.embedder.model().to_string(),
            dimension,
            built_at: Utc::now(),
            generation: self.generation.fetch_add(1, Ordering::Relaxed),
        };

        info!(
            "Index {} ready on {:?} backend",
            fingerprint.short(),
            index.active_backend()
        );
        Ok(Arc::new(index))
    }

    async fn evict_excess(&self, keep: &DocumentFingerprint) {
        if self.max_cached_indexes == 0 {
            return;
        }

        let evicted: Vec<IndexHandle> = {
            let mut indexes = self.indexes.lock().unwrap_or_else(PoisonError::into_inner);
            let mut built: Vec<(u64, DocumentFingerprint)> = indexes
                .iter()
                .filter_map(|(fp, slot)| slot.get().map(|h| (h.generation, fp.clone())))
                .collect();

            if built.len() <= self.max_cached_indexes {
                return;
            }

            built.sort_unstable();
            let excess = built.len() - self.max_cached_indexes;
            built
                .into_iter()
                .filter(|(_, fp)| fp != keep)
                .take(excess)
                .filter_map(|(_, fp)| indexes.remove(&fp))
                .filter_map(|slot| slot.get().cloned())
                .collect()
        };

        for handle in evicted {
            debug!("Evicted index {}", handle.fingerprint.short());
            release_remote(&handle).await;
        }
    }
}

async fn populate_remote(
    client: &Arc<PineconeClient>,
    fingerprint: &DocumentFingerprint,
    passages: &[Passage],
    vectors: Vec<Vec<f32>>,
    dimension: usize,
) -> Result<()> {
    let remote_dimension = run_remote(client, |c| c.describe_dimension()).await?;
    if remote_dimension != dimension {
        return Err(QaError::BackendUnavailable(format!(
            "remote index dimension {} differs from embedding dimension {}",
            remote_dimension, dimension
        )));
    }

    let records: Vec<RemoteVector> = passages
        .iter()
        .zip(vectors)
        .map(|(passage, values)| RemoteVector {
            id: passage.id.to_string(),
            values,
            metadata: serde_json::json!({
                "ordinal": passage.ordinal,
                "page": passage.page,
            }),
        })
        .collect();

    let namespace = fingerprint.as_str().to_string();
    if let Err(e) = run_remote(client, move |c| c.upsert(&namespace, &records)).await {
        // earlier batches may have landed
        delete_namespace(client, fingerprint).await;
        return Err(e);
    }
    Ok(())
}

async fn release_remote(handle: &IndexHandle) {
    if let Some(client) = &handle.remote {
        delete_namespace(client, &handle.fingerprint).await;
    }
}

async fn delete_namespace(client: &Arc<PineconeClient>, fingerprint: &DocumentFingerprint) {
    let namespace = fingerprint.as_str().to_string();
    if let Err(e) = run_remote(client, move |c| c.delete_namespace(&namespace)).await {
        warn!(
            "Failed to delete remote namespace for {}: {}",
            fingerprint.short(),
            e
        );
    }
}

async fn run_remote<T, F>(client: &Arc<PineconeClient>, op: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&PineconeClient) -> anyhow::Result<T> + Send + 'static,
{
    let client = Arc::clone(client);
    tokio::task::spawn_blocking(move || op(&client))
        .await
        .map_err(|e| QaError::BackendUnavailable(format!("remote task failed: {}", e)))?
        .map_err(|e| QaError::BackendUnavailable(format!("{:#}", e)))
}
