//! Qdrant-backed vector index over the REST API.
//!
//! Points are keyed by the memory's UUID, so upserts are naturally idempotent
//! and deletes are addressable without a lookup. The owning `user_id` and the
//! record's `created_at` travel in the point payload for filtered search and
//! tie-breaking.

use crate::traits::{SearchHit, VectorIndex};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use memvault_types::{MemoryId, MemvaultError, MemvaultResult, StoreKind, VectorEntry};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

/// Vector index speaking Qdrant's REST API.
pub struct QdrantVectorIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

fn store_err(e: impl std::fmt::Display) -> MemvaultError {
    MemvaultError::StoreUnavailable {
        store: StoreKind::Vector,
        reason: e.to_string(),
    }
}

#[derive(Serialize)]
struct UpsertPointsRequest {
    points: Vec<Point>,
}

#[derive(Serialize)]
struct Point {
    id: String,
    vector: Vec<f32>,
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct SearchResponse {
    result: Vec<ScoredPoint>,
}

#[derive(Deserialize)]
struct ScoredPoint {
    id: String,
    score: f32,
    #[serde(default)]
    payload: serde_json::Value,
}

#[derive(Deserialize)]
struct ScrollResponse {
    result: ScrollResult,
}

#[derive(Deserialize)]
struct ScrollResult {
    points: Vec<ScrollPoint>,
    #[serde(default)]
    next_page_offset: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct ScrollPoint {
    id: String,
    #[serde(default)]
    payload: serde_json::Value,
}

/// Filter clause matching one user's points.
fn user_filter(user_id: &str) -> serde_json::Value {
    json!({ "must": [{ "key": "user_id", "match": { "value": user_id } }] })
}

fn payload_created_at(payload: &serde_json::Value, key: &str) -> DateTime<Utc> {
    payload
        .get(key)
        .and_then(|v| v.as_str())
        .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

impl QdrantVectorIndex {
    /// Connect to a Qdrant instance and ensure the collection exists.
    pub async fn connect(
        base_url: impl Into<String>,
        collection: impl Into<String>,
        dimensions: usize,
    ) -> MemvaultResult<Self> {
        let index = Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            collection: collection.into(),
        };
        index.ensure_collection(dimensions).await?;
        Ok(index)
    }

    /// Create the collection if it does not exist (409 means it does).
    async fn ensure_collection(&self, dimensions: usize) -> MemvaultResult<()> {
        let url = format!("{}/collections/{}", self.base_url, self.collection);
        let body = json!({ "vectors": { "size": dimensions, "distance": "Cosine" } });
        let resp = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(store_err)?;
        let status = resp.status().as_u16();
        if status == 200 || status == 409 {
            debug!(collection = %self.collection, dims = dimensions, "qdrant collection ready");
            return Ok(());
        }
        Err(store_err(format!(
            "collection create failed (status {status}): {}",
            resp.text().await.unwrap_or_default()
        )))
    }

    async fn check(&self, resp: reqwest::Response, op: &str) -> MemvaultResult<reqwest::Response> {
        let status = resp.status().as_u16();
        if status == 200 {
            return Ok(resp);
        }
        Err(store_err(format!(
            "{op} failed (status {status}): {}",
            resp.text().await.unwrap_or_default()
        )))
    }
}

#[async_trait]
impl VectorIndex for QdrantVectorIndex {
    async fn upsert(&self, entry: &VectorEntry) -> MemvaultResult<()> {
        let url = format!(
            "{}/collections/{}/points?wait=true",
            self.base_url, self.collection
        );
        let body = UpsertPointsRequest {
            points: vec![Point {
                id: entry.memory_id.to_string(),
                vector: entry.vector.clone(),
                payload: json!({
                    "user_id": entry.user_id,
                    "created_at": entry.created_at.to_rfc3339(),
                    "inserted_at": Utc::now().to_rfc3339(),
                }),
            }],
        };
        let resp = self
            .client
            .put(&url)
            .json(&body)
            .send()
            .await
            .map_err(store_err)?;
        self.check(resp, "point upsert").await?;
        Ok(())
    }

    async fn delete(&self, memory_id: MemoryId) -> MemvaultResult<()> {
        let url = format!(
            "{}/collections/{}/points/delete?wait=true",
            self.base_url, self.collection
        );
        let body = json!({ "points": [memory_id.to_string()] });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(store_err)?;
        self.check(resp, "point delete").await?;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        user_id: &str,
        k: usize,
    ) -> MemvaultResult<Vec<SearchHit>> {
        let url = format!(
            "{}/collections/{}/points/search",
            self.base_url, self.collection
        );
        let body = json!({
            "vector": query,
            "limit": k,
            "filter": user_filter(user_id),
            "with_payload": true,
        });
        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(store_err)?;
        let resp = self.check(resp, "search").await?;
        let parsed: SearchResponse = resp
            .json()
            .await
            .map_err(|e| MemvaultError::Serialization(e.to_string()))?;

        let mut scored: Vec<(SearchHit, DateTime<Utc>)> = parsed
            .result
            .into_iter()
            .filter_map(|p| {
                let memory_id = MemoryId::parse(&p.id)?;
                let created_at = payload_created_at(&p.payload, "created_at");
                Some((
                    SearchHit {
                        memory_id,
                        score: p.score,
                    },
                    created_at,
                ))
            })
            .collect();

        // Qdrant already orders by score; re-sort to pin the recency
        // tie-break the contract requires.
        scored.sort_by(|(a, a_created), (b, b_created)| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b_created.cmp(a_created))
        });
        Ok(scored.into_iter().map(|(hit, _)| hit).collect())
    }

    async fn contains(&self, memory_id: MemoryId) -> MemvaultResult<bool> {
        let url = format!(
            "{}/collections/{}/points/{}",
            self.base_url, self.collection, memory_id
        );
        let resp = self.client.get(&url).send().await.map_err(store_err)?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(store_err(format!("point lookup failed (status {status})"))),
        }
    }

    async fn list_for_user(
        &self,
        user_id: &str,
    ) -> MemvaultResult<Vec<(MemoryId, DateTime<Utc>)>> {
        let url = format!(
            "{}/collections/{}/points/scroll",
            self.base_url, self.collection
        );
        let mut out = Vec::new();
        let mut offset: Option<serde_json::Value> = None;

        loop {
            let mut body = json!({
                "filter": user_filter(user_id),
                "limit": 256,
                "with_payload": true,
            });
            if let Some(ref o) = offset {
                body["offset"] = o.clone();
            }
            let resp = self
                .client
                .post(&url)
                .json(&body)
                .send()
                .await
                .map_err(store_err)?;
            let resp = self.check(resp, "scroll").await?;
            let parsed: ScrollResponse = resp
                .json()
                .await
                .map_err(|e| MemvaultError::Serialization(e.to_string()))?;

            for point in parsed.result.points {
                if let Some(id) = MemoryId::parse(&point.id) {
                    out.push((id, payload_created_at(&point.payload, "inserted_at")));
                }
            }
            match parsed.result.next_page_offset {
                Some(next) if !next.is_null() => offset = Some(next),
                _ => break,
            }
        }
        Ok(out)
    }
}
