
use super::{MetadataFilter, StoredRecord, VectorMatch, VectorMetadata, VectorRecord, quote};
use crate::BotError;
use crate::pipeline::VectorIndex;
use arrow::array::{Array, FixedSizeListArray, Float32Array, RecordBatchIterator, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use async_trait::async_trait;
use futures::TryStreamExt;
use itertools::Itertools;
use lancedb::{
    Connection, DistanceType, Table,
    query::{ExecutableQuery, QueryBase},
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

const TABLE_NAME: &str = "vectors";

/// Vector database store using LanceDB for filtered similarity search
pub struct VectorStore {
    connection: Connection,
    table_name: String,
    /// Fixed by the first upserted batch, or by the table found on disk
    vector_dimension: OnceCell<usize>,
}

fn db_error(context: &str, e: impl std::fmt::Display) -> BotError {
    BotError::Database(format!("{context}: {e}"))
}

impl VectorStore {
    /// Open (or create) the vector database directory
    #[inline]
    pub async fn new(db_path: &Path) -> Result<Self, BotError> {
        debug!("Initializing LanceDB at path: {:?}", db_path);

        std::fs::create_dir_all(db_path)
            .map_err(|e| db_error("Failed to create vector database directory", e))?;

        let uri = format!("file://{}", db_path.display());
        let connection = lancedb::connect(&uri)
            .execute()
            .await
            .map_err(|e| db_error("Failed to connect to LanceDB", e))?;

        let store = Self {
            connection,
            table_name: TABLE_NAME.to_string(),
            vector_dimension: OnceCell::new(),
        };

        if store.table_exists().await? {
            let dimension = store.detect_existing_vector_dimension().await?;
            store
                .vector_dimension
                .set(dimension)
                .map_err(|e| db_error("Failed to record vector dimension", e))?;
            info!("Opened vector table with dimension {}", dimension);
        }

        Ok(store)
    }

    #[inline]
    pub fn dimension(&self) -> Option<usize> {
        self.vector_dimension.get().copied()
    }

    async fn table_exists(&self) -> Result<bool, BotError> {
        let table_names = self
            .connection
            .table_names()
            .execute()
            .await
            .map_err(|e| db_error("Failed to list tables", e))?;
        Ok(table_names.contains(&self.table_name))
    }

    async fn open_table(&self) -> Result<Table, BotError> {
        self.connection
            .open_table(&self.table_name)
            .execute()
            .await
            .map_err(|e| db_error("Failed to open table", e))
    }

    /// The table if it has been created yet
    async fn existing_table(&self) -> Result<Option<Table>, BotError> {
        if self.dimension().is_none() {
            return Ok(None);
        }
        self.open_table().await.map(Some)
    }

    async fn detect_existing_vector_dimension(&self) -> Result<usize, BotError> {
        let schema = self
            .open_table()
            .await?
            .schema()
            .await
            .map_err(|e| db_error("Failed to get table schema", e))?;

        schema
            .fields()
            .iter()
            .find(|field| field.name() == "vector")
            .and_then(|field| match field.data_type() {
                DataType::FixedSizeList(_, size) => usize::try_from(*size).ok(),
                _ => None,
            })
            .ok_or_else(|| {
                BotError::Database("Could not find vector column or determine dimension".to_string())
            })
    }

    /// Create the table on first use and reject batches of another width
    async fn ensure_table(&self, vector_dim: usize) -> Result<(), BotError> {
        let dimension = *self
            .vector_dimension
            .get_or_try_init(|| async {
                info!("Creating vector table with {} dimensions", vector_dim);
                self.connection
                    .create_empty_table(&self.table_name, Self::create_schema(vector_dim)?)
                    .execute()
                    .await
                    .map_err(|e| db_error("Failed to create table", e))?;
                Ok::<usize, BotError>(vector_dim)
            })
            .await?;

        if dimension == vector_dim {
            Ok(())
        } else {
            Err(BotError::InvalidInput(format!(
                "Embedding dimension {vector_dim} does not match stored dimension {dimension}"
            )))
        }
    }

    fn create_schema(vector_dim: usize) -> Result<Arc<Schema>, BotError> {
        let width = i32::try_from(vector_dim)
            .map_err(|e| db_error("Vector dimension out of range", e))?;
        Ok(Arc::new(Schema::new(vec![
            Field::new("id", DataType::Utf8, false),
            Field::new(
                "vector",
                DataType::FixedSizeList(
                    Arc::new(Field::new("item", DataType::Float32, true)),
                    width,
                ),
                false,
            ),
            Field::new("tenant_id", DataType::Utf8, false),
            Field::new("visitor_id", DataType::Utf8, false),
            Field::new("product", DataType::Utf8, true),
            Field::new("field", DataType::Utf8, true),
            Field::new("text", DataType::Utf8, false),
            Field::new("filename", DataType::Utf8, false),
            Field::new("created_at", DataType::Utf8, false),
        ])))
    }

    fn create_record_batch(
        records: &[VectorRecord],
        vector_dim: usize,
    ) -> Result<RecordBatch, BotError> {
        let schema = Self::create_schema(vector_dim)?;
        let width = i32::try_from(vector_dim)
            .map_err(|e| db_error("Vector dimension out of range", e))?;

        let flat_values: Vec<f32> = records
            .iter()
            .flat_map(|record| record.vector.iter().copied())
            .collect();
        let field = Arc::new(Field::new("item", DataType::Float32, true));
        let vector_array =
            FixedSizeListArray::try_new(field, width, Arc::new(Float32Array::from(flat_values)), None)
                .map_err(|e| db_error("Failed to create vector array", e))?;

        let column = |f: fn(&VectorRecord) -> &str| -> Arc<dyn Array> {
            Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
        };
        let optional_column = |f: fn(&VectorRecord) -> Option<&str>| -> Arc<dyn Array> {
            Arc::new(StringArray::from(records.iter().map(f).collect::<Vec<_>>()))
        };

        let arrays: Vec<Arc<dyn Array>> = vec![
            column(|r| r.id.as_str()),
            Arc::new(vector_array),
            column(|r| r.metadata.tenant_id.as_str()),
            column(|r| r.metadata.visitor_id.as_str()),
            optional_column(|r| r.metadata.product.as_deref()),
            optional_column(|r| r.metadata.field.as_deref()),
            column(|r| r.metadata.text.as_str()),
            column(|r| r.metadata.filename.as_str()),
            column(|r| r.metadata.created_at.as_str()),
        ];

        RecordBatch::try_new(schema, arrays)
            .map_err(|e| db_error("Failed to create record batch", e))
    }

    /// Insert records, replacing any that share an id within the namespace
    #[inline]
    pub async fn upsert_records(
        &self,
        namespace: &str,
        records: Vec<VectorRecord>,
    ) -> Result<(), BotError> {
        let Some(first) = records.first() else {
            debug!("No vectors to store");
            return Ok(());
        };
        let vector_dim = first.vector.len();
        if vector_dim == 0 {
            return Err(BotError::InvalidInput("Empty embedding vector".to_string()));
        }
        if let Some(record) = records.iter().find(|r| r.vector.len() != vector_dim) {
            return Err(BotError::InvalidInput(format!(
                "Record {} has dimension {} but the batch uses {}",
                record.id,
                record.vector.len(),
                vector_dim
            )));
        }
        if let Some(record) = records.iter().find(|r| r.metadata.tenant_id != namespace) {
            return Err(BotError::InvalidInput(format!(
                "Record {} belongs to tenant {} not {}",
                record.id, record.metadata.tenant_id, namespace
            )));
        }

        self.ensure_table(vector_dim).await?;
        let table = self.open_table().await?;

        let id_list = records.iter().map(|r| quote(&r.id)).join(", ");
        table
            .delete(&format!("tenant_id = {} AND id IN ({})", quote(namespace), id_list))
            .await
            .map_err(|e| db_error("Failed to replace existing vectors", e))?;

        let record_batch = Self::create_record_batch(&records, vector_dim)?;
        let schema = record_batch.schema();
        let reader = RecordBatchIterator::new(std::iter::once(Ok(record_batch)), schema);
        table
            .add(reader)
            .execute()
            .await
            .map_err(|e| db_error("Failed to insert vectors", e))?;

        debug!("Stored {} vectors for tenant {}", records.len(), namespace);
        Ok(())
    }

    /// Cosine similarity search inside the namespace, best match first
    #[inline]
    pub async fn search(
        &self,
        namespace: &str,
        query_vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> Result<Vec<VectorMatch>, BotError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(Vec::new());
        };

        let predicate = filter.predicate(namespace);
        debug!("Vector search top_k={} where {}", top_k, predicate);

        let results = table
            .vector_search(query_vector)
            .map_err(|e| db_error("Failed to create vector search", e))?
            .column("vector")
            .distance_type(DistanceType::Cosine)
            .only_if(predicate)
            .limit(top_k)
            .execute()
            .await
            .map_err(|e| db_error("Failed to execute search", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read result stream", e))?;

        let mut matches = Vec::new();
        for batch in &batches {
            let distances = batch
                .column_by_name("_distance")
                .and_then(|col| col.as_any().downcast_ref::<Float32Array>());
            for (row, record) in parse_batch(batch)?.into_iter().enumerate() {
                let distance = distances
                    .filter(|d| !d.is_null(row))
                    .map_or(0.0, |d| d.value(row));
                matches.push(VectorMatch {
                    id: record.id,
                    metadata: record.metadata,
                    score: 1.0 - distance,
                });
            }
        }

        Ok(matches)
    }

    /// Plain metadata scan without ranking
    #[inline]
    pub async fn list_records(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        limit: usize,
    ) -> Result<Vec<StoredRecord>, BotError> {
        self.scan(filter.predicate(namespace), limit).await
    }

    #[inline]
    pub async fn get_record(&self, namespace: &str, id: &str) -> Result<Option<StoredRecord>, BotError> {
        let predicate = format!("tenant_id = {} AND id = {}", quote(namespace), quote(id));
        Ok(self.scan(predicate, 1).await?.into_iter().next())
    }

    async fn scan(&self, predicate: String, limit: usize) -> Result<Vec<StoredRecord>, BotError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(Vec::new());
        };

        let results = table
            .query()
            .only_if(predicate)
            .limit(limit)
            .execute()
            .await
            .map_err(|e| db_error("Failed to execute scan", e))?;

        let batches: Vec<RecordBatch> = results
            .try_collect()
            .await
            .map_err(|e| db_error("Failed to read result stream", e))?;

        let mut records = Vec::new();
        for batch in &batches {
            records.extend(parse_batch(batch)?);
        }
        Ok(records)
    }

    /// Returns whether anything was removed
    #[inline]
    pub async fn delete_record(&self, namespace: &str, id: &str) -> Result<bool, BotError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(false);
        };

        let predicate = format!("tenant_id = {} AND id = {}", quote(namespace), quote(id));
        let existing = table
            .count_rows(Some(predicate.clone()))
            .await
            .map_err(|e| db_error("Failed to count rows", e))?;
        if existing == 0 {
            return Ok(false);
        }

        table
            .delete(&predicate)
            .await
            .map_err(|e| db_error("Failed to delete vector", e))?;

        info!("Deleted vector {} for tenant {}", id, namespace);
        Ok(true)
    }

    #[inline]
    pub async fn count(&self, namespace: &str) -> Result<usize, BotError> {
        let Some(table) = self.existing_table().await? else {
            return Ok(0);
        };
        table
            .count_rows(Some(MetadataFilter::default().predicate(namespace)))
            .await
            .map_err(|e| db_error("Failed to count rows", e))
    }
}

fn string_column<'a>(batch: &'a RecordBatch, name: &str) -> Result<&'a StringArray, BotError> {
    batch
        .column_by_name(name)
        .ok_or_else(|| BotError::Database(format!("Missing {name} column")))?
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| BotError::Database(format!("Invalid {name} column type")))
}

fn optional_value(array: &StringArray, row: usize) -> Option<String> {
    (!array.is_null(row)).then(|| array.value(row).to_string())
}

fn parse_batch(batch: &RecordBatch) -> Result<Vec<StoredRecord>, BotError> {
    let ids = string_column(batch, "id")?;
    let tenant_ids = string_column(batch, "tenant_id")?;
    let visitor_ids = string_column(batch, "visitor_id")?;
    let products = string_column(batch, "product")?;
    let fields = string_column(batch, "field")?;
    let texts = string_column(batch, "text")?;
    let filenames = string_column(batch, "filename")?;
    let created_ats = string_column(batch, "created_at")?;

    Ok((0..batch.num_rows())
        .map(|row| StoredRecord {
            id: ids.value(row).to_string(),
            metadata: VectorMetadata {
                tenant_id: tenant_ids.value(row).to_string(),
                visitor_id: visitor_ids.value(row).to_string(),
                product: optional_value(products, row),
                field: optional_value(fields, row),
                text: texts.value(row).to_string(),
                filename: filenames.value(row).to_string(),
                created_at: created_ats.value(row).to_string(),
            },
        })
        .collect())
}

#[async_trait]
impl VectorIndex for VectorStore {
    async fn upsert(&self, namespace: &str, records: Vec<VectorRecord>) -> crate::Result<()> {
        self.upsert_records(namespace, records).await
    }

    async fn query(
        &self,
        namespace: &str,
        vector: &[f32],
        top_k: usize,
        filter: &MetadataFilter,
    ) -> crate::Result<Vec<VectorMatch>> {
        self.search(namespace, vector, top_k, filter).await
    }

    async fn delete(&self, id: &str, namespace: &str) -> crate::Result<bool> {
        self.delete_record(namespace, id).await
    }

    async fn get(&self, namespace: &str, id: &str) -> crate::Result<Option<StoredRecord>> {
        self.get_record(namespace, id).await
    }

    async fn list(
        &self,
        namespace: &str,
        filter: &MetadataFilter,
        limit: usize,
    ) -> crate::Result<Vec<StoredRecord>> {
        self.list_records(namespace, filter, limit).await
    }
}
