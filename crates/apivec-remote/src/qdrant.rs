//! Qdrant collection.
//!
//! # Payload
//!
//! | Key | Type | Purpose |
//! |-----|------|---------|
//! | `doc_id` | keyword | Document id |
//! | `full_name` | keyword | API name, filterable |
//! | `category` | keyword | Filterable |
//! | `module` | keyword | Filterable |
//! | `tags` | keyword[] | Filterable |
//! | `description` | text | Filterable |
//! | `signature` | keyword | Filterable |
//! | `document` | text | The full JSON-encoded document |
//!
//! Point ids are UUIDv5 of the document id, so re-adding a document
//! overwrites its point.
//!
//! # Feature Gate
//!
//! This module requires the `remote-qdrant` feature.

use apivec_core::config::RemoteConfig;
use apivec_core::filter::{FilterValue, Filters};
use apivec_core::fuzzy::NameEntry;
use apivec_core::{BackendKind, Document, Error, Result};
use async_trait::async_trait;
use qdrant_client::qdrant::value::Kind;
use qdrant_client::qdrant::{
    Condition, CountPointsBuilder, CreateCollectionBuilder, Distance, Filter, GetPointsBuilder,
    PointId, PointStruct, RetrievedPoint, ScrollPointsBuilder, SearchPointsBuilder,
    UpsertPointsBuilder, Value, VectorParamsBuilder,
};
use qdrant_client::{Payload, Qdrant};
use std::collections::HashMap;
use uuid::Uuid;

use crate::collection::{CollectionPoint, VectorCollection};

const SCROLL_PAGE: u32 = 256;

fn remote_err(op: &str, e: impl std::fmt::Display) -> Error {
    Error::backend(BackendKind::Remote, format!("{op} failed: {e}"))
}

/// Stable point id for a document id.
pub fn point_id(doc_id: &str) -> String {
    Uuid::new_v5(&Uuid::NAMESPACE_OID, doc_id.as_bytes()).to_string()
}

/// Map a filter field to its payload key. Unknown fields map to `None`.
fn payload_key(field: &str) -> Option<&'static str> {
    Some(match field {
        "id" => "doc_id",
        "name" | "api_name" | "full_name" => "full_name",
        "category" => "category",
        "module" => "module",
        "description" => "description",
        "signature" => "signature",
        "tags" | "tag" => "tags",
        _ => return None,
    })
}

/// Translate filters into a Qdrant `must` filter.
///
/// Unknown fields are left out; the backend re-checks every hit and drops
/// documents those fields cannot match.
fn to_qdrant_filter(filters: &Filters) -> Option<Filter> {
    let conditions: Vec<Condition> = filters
        .iter()
        .filter_map(|(field, value)| {
            let key = payload_key(field)?;
            Some(match value {
                FilterValue::Equals(v) => Condition::matches(key, v.clone()),
                FilterValue::AnyOf(vs) => Condition::matches(key, vs.clone()),
            })
        })
        .collect();
    (!conditions.is_empty()).then(|| Filter::must(conditions))
}

fn payload_for(doc: &Document) -> Result<Payload> {
    let encoded = serde_json::to_string(doc)?;
    let value = serde_json::json!({
        "doc_id": doc.id,
        "full_name": doc.name,
        "category": doc.category,
        "module": doc.module,
        "tags": doc.tags,
        "description": doc.description,
        "signature": doc.signature,
        "document": encoded,
    });
    Payload::try_from(value).map_err(|e| remote_err("payload encoding", e))
}

fn payload_str<'a>(payload: &'a HashMap<String, Value>, key: &str) -> Option<&'a str> {
    match payload.get(key).and_then(|v| v.kind.as_ref()) {
        Some(Kind::StringValue(s)) => Some(s.as_str()),
        _ => None,
    }
}

fn document_from_payload(payload: &HashMap<String, Value>) -> Option<Document> {
    let raw = payload_str(payload, "document")?;
    match serde_json::from_str(raw) {
        Ok(doc) => Some(doc),
        Err(e) => {
            log::warn!("Skipping point with undecodable document payload: {e}");
            None
        }
    }
}

/// A collection in a Qdrant server.
pub struct QdrantCollection {
    client: Qdrant,
    name: String,
    url: String,
}

impl QdrantCollection {
    /// Build a client for the configured server. Does not connect.
    pub fn from_config(config: &RemoteConfig) -> Result<Self> {
        let mut builder = Qdrant::from_url(&config.url).timeout(config.timeout());
        if let Some(key) = &config.api_key {
            builder = builder.api_key(key.clone());
        }
        let client = builder
            .build()
            .map_err(|e| Error::initialization(BackendKind::Remote, e.to_string()))?;
        Ok(Self {
            client,
            name: config.collection.clone(),
            url: config.url.clone(),
        })
    }

    async fn scroll_all(&self) -> Result<Vec<RetrievedPoint>> {
        let mut points = Vec::new();
        let mut offset: Option<PointId> = None;
        loop {
            let mut request = ScrollPointsBuilder::new(&self.name)
                .limit(SCROLL_PAGE)
                .with_payload(true)
                .with_vectors(false);
            if let Some(next) = offset.take() {
                request = request.offset(next);
            }
            let page = self
                .client
                .scroll(request)
                .await
                .map_err(|e| remote_err("scroll", e))?;
            points.extend(page.result);
            match page.next_page_offset {
                Some(next) => offset = Some(next),
                None => break,
            }
        }
        Ok(points)
    }
}

#[async_trait]
impl VectorCollection for QdrantCollection {
    fn name(&self) -> &str {
        &self.name
    }

    fn url(&self) -> &str {
        &self.url
    }

    async fn ping(&self) -> Result<String> {
        let reply = self
            .client
            .health_check()
            .await
            .map_err(|e| remote_err("health check", e))?;
        Ok(format!("{} {}", reply.title, reply.version))
    }

    async fn ensure_collection(&self, dimension: usize) -> Result<()> {
        let exists = self
            .client
            .collection_exists(&self.name)
            .await
            .map_err(|e| remote_err("collection_exists", e))?;
        if exists {
            return Ok(());
        }
        self.client
            .create_collection(
                CreateCollectionBuilder::new(&self.name)
                    .vectors_config(VectorParamsBuilder::new(dimension as u64, Distance::Cosine)),
            )
            .await
            .map_err(|e| remote_err("create_collection", e))?;
        log::info!(
            "Created Qdrant collection '{}' (dimension {dimension})",
            self.name
        );
        Ok(())
    }

    async fn upsert(&self, points: Vec<CollectionPoint>) -> Result<()> {
        let structs = points
            .into_iter()
            .map(|p| {
                let payload = payload_for(&p.document)?;
                Ok(PointStruct::new(point_id(&p.document.id), p.vector, payload))
            })
            .collect::<Result<Vec<_>>>()?;
        self.client
            .upsert_points(UpsertPointsBuilder::new(&self.name, structs).wait(true))
            .await
            .map_err(|e| remote_err("upsert", e))?;
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        filters: Option<&Filters>,
    ) -> Result<Vec<(Document, f32)>> {
        let mut request =
            SearchPointsBuilder::new(&self.name, vector.to_vec(), limit as u64).with_payload(true);
        if let Some(filter) = filters.and_then(to_qdrant_filter) {
            request = request.filter(filter);
        }
        let response = self
            .client
            .search_points(request)
            .await
            .map_err(|e| remote_err("search", e))?;
        Ok(response
            .result
            .into_iter()
            .filter_map(|hit| document_from_payload(&hit.payload).map(|doc| (doc, hit.score)))
            .collect())
    }

    async fn retrieve(&self, ids: &[String]) -> Result<Vec<Document>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let point_ids: Vec<PointId> = ids.iter().map(|id| PointId::from(point_id(id))).collect();
        let response = self
            .client
            .get_points(GetPointsBuilder::new(&self.name, point_ids).with_payload(true))
            .await
            .map_err(|e| remote_err("get_points", e))?;
        Ok(response
            .result
            .iter()
            .filter_map(|p| document_from_payload(&p.payload))
            .collect())
    }

    async fn scroll_documents(&self) -> Result<Vec<Document>> {
        Ok(self
            .scroll_all()
            .await?
            .iter()
            .filter_map(|p| document_from_payload(&p.payload))
            .collect())
    }

    async fn scroll_names(&self) -> Result<Vec<NameEntry>> {
        Ok(self
            .scroll_all()
            .await?
            .iter()
            .filter_map(|p| {
                let id = payload_str(&p.payload, "doc_id")?;
                let name = payload_str(&p.payload, "full_name")?;
                let keywords = match p.payload.get("tags").and_then(|v| v.kind.as_ref()) {
                    Some(Kind::ListValue(list)) => list
                        .values
                        .iter()
                        .filter_map(|v| match &v.kind {
                            Some(Kind::StringValue(s)) => Some(s.clone()),
                            _ => None,
                        })
                        .collect(),
                    _ => Vec::new(),
                };
                Some(NameEntry {
                    id: id.to_string(),
                    name: name.to_string(),
                    keywords,
                })
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        let response = self
            .client
            .count(CountPointsBuilder::new(&self.name).exact(true))
            .await
            .map_err(|e| remote_err("count", e))?;
        Ok(response.result.map_or(0, |r| r.count as usize))
    }
}

impl std::fmt::Debug for QdrantCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QdrantCollection")
            .field("url", &self.url)
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_point_id_is_stable_uuid() {
        assert_eq!(point_id("mesh.bevel"), point_id("mesh.bevel"));
        assert_ne!(point_id("mesh.bevel"), point_id("mesh.extrude"));
        assert!(Uuid::parse_str(&point_id("x")).is_ok());
    }

    #[test]
    fn test_filter_translation() {
        let filters = Filters::new()
            .with_equals("api_name", "mesh.bevel")
            .with_any_of("category", ["a", "b"])
            .with_equals("unknown", "x");
        let filter = to_qdrant_filter(&filters).unwrap();
        assert_eq!(filter.must.len(), 2);

        let only_unknown = Filters::new().with_equals("unknown", "x");
        assert!(to_qdrant_filter(&only_unknown).is_none());
    }

    #[test]
    fn test_payload_round_trip() {
        let doc = Document::new("m1", "mesh.bevel")
            .with_category("mesh_operators")
            .with_tag("edges");
        let payload: HashMap<String, Value> = payload_for(&doc).unwrap().into();
        assert_eq!(payload_str(&payload, "full_name"), Some("mesh.bevel"));
        assert_eq!(document_from_payload(&payload), Some(doc));
    }

    #[tokio::test]
    #[ignore = "requires a running Qdrant server"]
    async fn test_live_server_round_trip() {
        let config = RemoteConfig {
            url: "http://localhost:6334".into(),
            collection: "apivec_test".into(),
            ..RemoteConfig::default()
        };
        let collection = QdrantCollection::from_config(&config).unwrap();
        collection.ping().await.unwrap();
        collection.ensure_collection(4).await.unwrap();
        collection
            .upsert(vec![CollectionPoint {
                vector: vec![1.0, 0.0, 0.0, 0.0],
                document: Document::new("m1", "mesh.bevel"),
            }])
            .await
            .unwrap();
        assert!(collection.count().await.unwrap() >= 1);
    }
}
