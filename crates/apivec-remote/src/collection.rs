//! The vector database seam.
//!
//! [`VectorCollection`] is the narrow set of calls the remote backend makes
//! against a vector database collection. Embedding, score normalization,
//! fuzzy matching and timeouts all live above it in
//! [`RemoteBackend`](crate::RemoteBackend).
//!
//! [`InMemoryCollection`] answers those calls from a map. It serves the
//! `:memory:` URL and tests, and can be switched offline to simulate an
//! outage.

use apivec_core::filter::Filters;
use apivec_core::fuzzy::NameEntry;
use apivec_core::{BackendKind, Document, Error, Result, ScoreKind};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// One point to upsert: a document and its embedding.
#[derive(Debug, Clone)]
pub struct CollectionPoint {
    /// The embedding.
    pub vector: Vec<f32>,
    /// The document stored as payload.
    pub document: Document,
}

/// Operations against a single remote collection.
#[async_trait]
pub trait VectorCollection: Send + Sync {
    /// Collection name.
    fn name(&self) -> &str;

    /// Server location, for diagnostics.
    fn url(&self) -> &str;

    /// How raw query scores should be read.
    fn score_kind(&self) -> ScoreKind {
        ScoreKind::Similarity
    }

    /// Check the server is reachable; returns its version string.
    async fn ping(&self) -> Result<String>;

    /// Create the collection if it does not exist.
    async fn ensure_collection(&self, dimension: usize) -> Result<()>;

    /// Insert or overwrite points, keyed by document id.
    async fn upsert(&self, points: Vec<CollectionPoint>) -> Result<()>;

    /// Nearest neighbours of `vector`, best first, with raw scores.
    ///
    /// Implementations apply `filters` where they can; callers re-check
    /// every hit.
    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<(Document, f32)>>;

    /// Fetch documents by id. Missing ids are skipped.
    async fn retrieve(&self, ids: &[String]) -> Result<Vec<Document>>;

    /// Every stored document.
    async fn scroll_documents(&self) -> Result<Vec<Document>>;

    /// Names and keywords of every stored document.
    async fn scroll_names(&self) -> Result<Vec<NameEntry>> {
        Ok(self
            .scroll_documents()
            .await?
            .iter()
            .map(NameEntry::from_document)
            .collect())
    }

    /// Number of stored points.
    async fn count(&self) -> Result<usize>;
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if na == 0.0 || nb == 0.0 {
        0.0
    } else {
        dot / (na * nb)
    }
}

/// A collection held in process memory.
#[derive(Debug)]
pub struct InMemoryCollection {
    name: String,
    dimension: RwLock<Option<usize>>,
    points: RwLock<BTreeMap<String, CollectionPoint>>,
    offline: AtomicBool,
    calls: AtomicUsize,
}

impl InMemoryCollection {
    /// Create an empty collection.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            dimension: RwLock::new(None),
            points: RwLock::new(BTreeMap::new()),
            offline: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    /// Make every call fail with a backend error until switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Release);
    }

    /// Whether the collection is simulating an outage.
    pub fn is_offline(&self) -> bool {
        self.offline.load(Ordering::Acquire)
    }

    /// Number of calls received, including failed ones.
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    fn enter(&self, op: &str) -> Result<()> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        if self.is_offline() {
            return Err(Error::backend(
                BackendKind::Remote,
                format!("{op} on '{}': connection refused", self.name),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorCollection for InMemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        ":memory:"
    }

    async fn ping(&self) -> Result<String> {
        self.enter("ping")?;
        Ok(format!("in-memory {}", env!("CARGO_PKG_VERSION")))
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        self.enter("ensure_collection")?;
        let mut current = self.dimension.write().await;
        match *current {
            Some(d) if d != dimension => Err(Error::initialization(
                BackendKind::Remote,
                format!(
                    "collection '{}' has dimension {d}, expected {dimension}",
                    self.name
                ),
            )),
            Some(_) => Ok(()),
            None => {
                log::debug!("Created in-memory collection '{}'", self.name);
                *current = Some(dimension);
                Ok(())
            }
        }
    }

    async fn upsert(&self, points: Vec<CollectionPoint>) -> Result<()> {
        self.enter("upsert")?;
        let dimension = *self.dimension.read().await;
        let mut stored = self.points.write().await;
        for point in points {
            if let Some(d) = dimension
                && point.vector.len() != d
            {
                return Err(Error::invalid_document(
                    &point.document.id,
                    format!("vector has dimension {}, collection expects {d}", point.vector.len()),
                ));
            }
            stored.insert(point.document.id.clone(), point);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<(Document, f32)>> {
        self.enter("query")?;
        let stored = self.points.read().await;
        let mut hits: Vec<(Document, f32)> = stored
            .values()
            .filter(|p| apivec_core::filter::matches(filters, &p.document))
            .map(|p| (p.document.clone(), cosine(vector, &p.vector)))
            .collect();
        hits.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.id.cmp(&b.0.id)));
        hits.truncate(limit);
        Ok(hits)
    }

    async fn retrieve(&self, ids: &[String]) -> Result<Vec<Document>> {
        self.enter("retrieve")?;
        let stored = self.points.read().await;
        Ok(ids
            .iter()
            .filter_map(|id| stored.get(id).map(|p| p.document.clone()))
            .collect())
    }

    async fn scroll_documents(&self) -> Result<Vec<Document>> {
        self.enter("scroll")?;
        Ok(self
            .points
            .read()
            .await
            .values()
            .map(|p| p.document.clone())
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        self.enter("count")?;
        Ok(self.points.read().await.len())
    }
}
