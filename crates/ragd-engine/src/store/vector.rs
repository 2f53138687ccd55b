//! Dense vector storage, backed by LanceDB. Implements the backend-neutral
//! capability set from §9 ("Polymorphism over backends"): `{add, search,
//! get, delete, count, stats, health, persist, reset}`.

use crate::config::{BackendConfig, VectorBackendTier};
use crate::error::{EngineError, EngineResult};
use arrow_array::{FixedSizeListArray, Float32Array, RecordBatch, RecordBatchIterator, StringArray};
use arrow_schema::{DataType, Field, Schema as ArrowSchema};
use async_trait::async_trait;
use futures::TryStreamExt;
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

pub const VECTOR_TABLE: &str = "chunks";

/// One scored hit returned by a vector search.
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub chunk_id: String,
    /// Cosine-normalised to [0, 1]: identical → 1.0, orthogonal → 0.5, opposite → 0.0.
    pub score: f32,
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn add(&self, chunk_id: &str, vector: &[f32]) -> EngineResult<()>;
    async fn add_batch(&self, entries: &[(String, Vec<f32>)]) -> EngineResult<()>;
    async fn search(
        &self,
        query: &[f32],
        k: usize,
        candidates: Option<&HashSet<String>>,
    ) -> EngineResult<Vec<VectorHit>>;
    async fn get(&self, chunk_id: &str) -> EngineResult<Option<Vec<f32>>>;
    async fn delete(&self, chunk_ids: &[String]) -> EngineResult<()>;
    async fn count(&self) -> EngineResult<usize>;
    fn current_tier(&self) -> VectorBackendTier;
    async fn health(&self) -> EngineResult<()>;
    async fn persist(&self) -> EngineResult<()>;
    async fn reset(&self) -> EngineResult<()>;
}

/// Cosine similarity mapped from `[-1, 1]` to `[0, 1]`.
pub fn normalise_cosine(cosine: f32) -> f32 {
    ((cosine + 1.0) / 2.0).clamp(0.0, 1.0)
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

/// LanceDB-backed vector store. Picks a tier on first insertion per the
/// chunk-count policy in `BackendConfig::select_tier`, unless pinned.
pub struct LanceVectorStore {
    connection: lancedb::Connection,
    dimension: usize,
    backend: BackendConfig,
    tier: parking_lot::RwLock<VectorBackendTier>,
}

impl LanceVectorStore {
    pub async fn open(path: &Path, dimension: usize, backend: BackendConfig) -> EngineResult<Self> {
        let connection = lancedb::connect(&path.to_string_lossy())
            .execute()
            .await
            .map_err(backend_err)?;

        let initial_tier = backend.select_tier(0);

        let store = Self {
            connection,
            dimension,
            backend,
            tier: parking_lot::RwLock::new(initial_tier),
        };
        store.ensure_table().await?;
        Ok(store)
    }

    fn schema(&self) -> Arc<ArrowSchema> {
        Arc::new(ArrowSchema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    self.dimension as i32,
                ),
                false,
            ),
        ]))
    }

    async fn ensure_table(&self) -> EngineResult<()> {
        let names = self.connection.table_names().execute().await.map_err(backend_err)?;
        if names.iter().any(|n| n == VECTOR_TABLE) {
            return Ok(());
        }

        let schema = self.schema();
        let empty_batch = self.batch_for(&[])?;
        let reader = RecordBatchIterator::new(vec![Ok(empty_batch)], schema);
        self.connection
            .create_table(VECTOR_TABLE, Box::new(reader))
            .execute()
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    fn batch_for(&self, entries: &[(String, Vec<f32>)]) -> EngineResult<RecordBatch> {
        let schema = self.schema();
        let ids: Vec<&str> = entries.iter().map(|(id, _)| id.as_str()).collect();
        let id_array = StringArray::from(ids);

        let flat: Vec<f32> = entries.iter().flat_map(|(_, v)| v.iter().copied()).collect();
        let values = Float32Array::from(flat);
        let vector_array = FixedSizeListArray::try_new(
            Arc::new(Field::new("item", DataType::Float32, true)),
            self.dimension as i32,
            Arc::new(values),
            None,
        )
        .map_err(|e| EngineError::Internal(e.to_string()))?;

        RecordBatch::try_new(schema, vec![Arc::new(id_array), Arc::new(vector_array)])
            .map_err(|e| EngineError::Internal(e.to_string()))
    }

    async fn maybe_retier(&self, chunk_count: usize) {
        if self.backend.pinned_tier.is_some() {
            return;
        }
        let new_tier = self.backend.select_tier(chunk_count);
        let mut tier = self.tier.write();
        if *tier != new_tier {
            tracing::info!(from = ?*tier, to = ?new_tier, chunk_count, "vector backend tier changed");
            *tier = new_tier;
        }
    }

    async fn open_table(&self) -> EngineResult<lancedb::Table> {
        self.connection.open_table(VECTOR_TABLE).execute().await.map_err(backend_err)
    }
}

#[async_trait]
impl VectorStore for LanceVectorStore {
    async fn add(&self, chunk_id: &str, vector: &[f32]) -> EngineResult<()> {
        self.add_batch(&[(chunk_id.to_string(), vector.to_vec())]).await
    }

    async fn add_batch(&self, entries: &[(String, Vec<f32>)]) -> EngineResult<()> {
        for (_, v) in entries {
            if v.len() != self.dimension {
                return Err(EngineError::DimensionMismatch {
                    expected: self.dimension,
                    actual: v.len(),
                });
            }
        }
        if entries.is_empty() {
            return Ok(());
        }

        let table = self.open_table().await?;
        let schema = self.schema();
        let batch = self.batch_for(entries)?;
        let reader = RecordBatchIterator::new(vec![Ok(batch)], schema);
        table
            .add(Box::new(reader))
            .execute()
            .await
            .map_err(backend_err)?;

        let total = table.count_rows(None).await.map_err(backend_err)?;
        self.maybe_retier(total).await;
        Ok(())
    }

    async fn search(
        &self,
        query: &[f32],
        k: usize,
        candidates: Option<&HashSet<String>>,
    ) -> EngineResult<Vec<VectorHit>> {
        if query.len() != self.dimension {
            return Err(EngineError::DimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }

        let table = self.open_table().await?;

        // Two-stage filtered ANN (§4.1): below the exact-filter threshold the
        // caller scores candidates itself; otherwise over-fetch and intersect,
        // since not every backend tier accepts an arbitrary selector.
        let fetch_k = match candidates {
            Some(c) if !c.is_empty() => (k * 10).max(k),
            _ => k,
        };

        let mut query_builder = table
            .vector_search(query.to_vec())
            .map_err(backend_err)?
            .limit(fetch_k);

        if let Some(c) = candidates {
            if !c.is_empty() {
                let ids = c
                    .iter()
                    .map(|id| format!("'{}'", id.replace('\'', "''")))
                    .collect::<Vec<_>>()
                    .join(", ");
                query_builder = query_builder
                    .only_if(format!("chunk_id IN ({ids})"))
                    .map_err(backend_err)?;
            }
        }

        let mut stream = query_builder.execute().await.map_err(backend_err)?;
        let mut hits = Vec::new();

        while let Some(batch) = stream.try_next().await.map_err(backend_err)? {
            let id_col = batch
                .column_by_name("chunk_id")
                .and_then(|c| c.as_any().downcast_ref::<StringArray>())
                .ok_or_else(|| EngineError::Internal("missing chunk_id column".into()))?;
            let distance_col = batch
                .column_by_name("_distance")
                .and_then(|c| c.as_any().downcast_ref::<Float32Array>());

            for i in 0..batch.num_rows() {
                let chunk_id = id_col.value(i).to_string();
                // LanceDB's default metric is L2 over normalised vectors; convert
                // to a cosine-equivalent similarity and renormalise to [0, 1].
                let score = match distance_col {
                    Some(d) => normalise_cosine(1.0 - d.value(i) / 2.0),
                    None => 0.5,
                };
                hits.push(VectorHit { chunk_id, score });
            }
        }

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        hits.truncate(k);
        Ok(hits)
    }

    async fn get(&self, chunk_id: &str) -> EngineResult<Option<Vec<f32>>> {
        let table = self.open_table().await?;
        let escaped = chunk_id.replace('\'', "''");
        let mut stream = table
            .query()
            .only_if(format!("chunk_id = '{escaped}'"))
            .limit(1)
            .execute()
            .await
            .map_err(backend_err)?;

        if let Some(batch) = stream.try_next().await.map_err(backend_err)? {
            if batch.num_rows() == 0 {
                return Ok(None);
            }
            let vector_col = batch
                .column_by_name("vector")
                .and_then(|c| c.as_any().downcast_ref::<FixedSizeListArray>())
                .ok_or_else(|| EngineError::Internal("missing vector column".into()))?;
            let values = vector_col
                .value(0)
                .as_any()
                .downcast_ref::<Float32Array>()
                .map(|a| a.values().to_vec());
            return Ok(values);
        }
        Ok(None)
    }

    async fn delete(&self, chunk_ids: &[String]) -> EngineResult<()> {
        if chunk_ids.is_empty() {
            return Ok(());
        }
        let table = self.open_table().await?;
        let ids = chunk_ids
            .iter()
            .map(|id| format!("'{}'", id.replace('\'', "''")))
            .collect::<Vec<_>>()
            .join(", ");
        table
            .delete(&format!("chunk_id IN ({ids})"))
            .await
            .map_err(backend_err)?;
        Ok(())
    }

    async fn count(&self) -> EngineResult<usize> {
        let table = self.open_table().await?;
        table.count_rows(None).await.map_err(backend_err)
    }

    fn current_tier(&self) -> VectorBackendTier {
        *self.tier.read()
    }

    async fn health(&self) -> EngineResult<()> {
        self.open_table().await?;
        Ok(())
    }

    async fn persist(&self) -> EngineResult<()> {
        // LanceDB writes are durable on commit; nothing further to flush.
        Ok(())
    }

    async fn reset(&self) -> EngineResult<()> {
        self.connection
            .drop_table(VECTOR_TABLE)
            .await
            .map_err(backend_err)?;
        self.ensure_table().await
    }
}

fn backend_err(e: impl std::fmt::Display) -> EngineError {
    EngineError::BackendUnavailable {
        backend: "vector".to_string(),
        message: e.to_string(),
    }
}
