use anyhow::{Context, Result};
use clap::ValueEnum;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::database::Database;
use crate::database::lancedb::VectorStore;
use crate::database::sqlite::models::{NewKeyword, NewTenant, Plan, SubscriptionStatus};
use crate::database::sqlite::queries::TenantQueries;
use crate::embeddings::OllamaClient;
use crate::ingest::{FieldItem, IngestPayload, IngestRequest, Ingestor};
use crate::pipeline::PipelineSettings;

/// Shape of an ingestion file
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum IngestMode {
    /// JSON array of `{product, field, text}` items
    Fields,
    /// Any text file, cut into fixed windows
    Text,
}

/// Keyword files come either as a phrase-to-product map or as full entries
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum KeywordFile {
    Entries(Vec<NewKeyword>),
    Map(BTreeMap<String, String>),
}

async fn open_database(config: &Config) -> Result<Database> {
    Database::new(config.database_path())
        .await
        .context("Failed to initialize database")
}

/// Start the HTTP server with the stored configuration
#[inline]
pub async fn serve() -> Result<()> {
    let config = Config::load_default()?;
    crate::server::serve(config).await
}

#[inline]
pub async fn create_tenant(name: &str, paid: bool) -> Result<()> {
    let name = name.trim();
    if name.is_empty() {
        anyhow::bail!("Tenant name cannot be empty");
    }

    let config = Config::load_default()?;
    let database = open_database(&config).await?;
    let plan = if paid { Plan::Paid } else { Plan::Free };
    let tenant = database
        .create_tenant(NewTenant {
            name: name.to_string(),
            plan,
        })
        .await?;

    info!("Created tenant {} ({})", tenant.name, tenant.id);
    println!("Created tenant: {}", tenant.name);
    println!("  ID:      {}", tenant.id);
    println!("  Plan:    {} ({})", tenant.plan, tenant.subscription_status);
    println!("  API key: {}", tenant.api_key);
    Ok(())
}

#[inline]
pub async fn list_tenants() -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;
    let tenants = database.list_tenants().await?;

    if tenants.is_empty() {
        println!("No tenants yet.");
        println!("Use 'storebot tenant create <name>' to add one.");
        return Ok(());
    }

    println!("Tenants ({} total):", tenants.len());
    for tenant in &tenants {
        println!();
        println!("{} (ID: {})", tenant.name, tenant.id);
        println!("   Plan: {} ({})", tenant.plan, tenant.subscription_status);
        println!(
            "   Usage: {} questions, {} uploads",
            tenant.question_count, tenant.upload_count
        );
        println!(
            "   Created: {}",
            tenant.created_date.format("%Y-%m-%d %H:%M:%S")
        );
    }
    Ok(())
}

/// Switch a tenant between plans; paid tenants become active immediately
#[inline]
pub async fn set_tenant_plan(tenant_id: &str, paid: bool) -> Result<()> {
    let config = Config::load_default()?;
    let database = open_database(&config).await?;
    let (plan, status) = if paid {
        (Plan::Paid, SubscriptionStatus::Active)
    } else {
        (Plan::Free, SubscriptionStatus::Inactive)
    };

    let tenant = TenantQueries::set_plan(database.pool(), tenant_id, plan, status)
        .await?
        .with_context(|| format!("Tenant '{tenant_id}' not found"))?;
    println!(
        "Tenant {} is now on the {} plan ({})",
        tenant.name, tenant.plan, tenant.subscription_status
    );
    Ok(())
}

/// Parse either `{ "phrase": "Product" }` or `[{ "phrase", "product", "weight" }]`
#[inline]
pub fn parse_keyword_file(contents: &str) -> Result<Vec<NewKeyword>> {
    let parsed: KeywordFile =
        serde_json::from_str(contents).context("Keyword file must be a JSON object or array")?;
    Ok(match parsed {
        KeywordFile::Entries(entries) => entries,
        KeywordFile::Map(map) => map
            .iter()
            .map(|(phrase, product)| NewKeyword::new(phrase, product))
            .collect(),
    })
}

/// Replace a tenant's keyword table from a JSON file
#[inline]
pub async fn import_keywords(tenant_id: &str, file: &Path) -> Result<()> {
    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let keywords = parse_keyword_file(&contents)?;

    let config = Config::load_default()?;
    let database = open_database(&config).await?;
    database
        .get_tenant(tenant_id)
        .await?
        .with_context(|| format!("Tenant '{tenant_id}' not found"))?;

    let imported = database.import_keywords(tenant_id, &keywords).await?;
    let skipped = keywords.len() - imported;
    if skipped > 0 {
        warn!("Skipped {} unusable keyword entries", skipped);
    }
    println!(
        "Imported {} keywords for tenant {} ({} skipped)",
        imported, tenant_id, skipped
    );
    Ok(())
}

/// Build an upload request from a file on disk
#[inline]
pub fn read_ingest_request(
    file: &Path,
    mode: IngestMode,
    visitor_id: &str,
    product: Option<String>,
) -> Result<IngestRequest> {
    let contents = fs::read_to_string(file)
        .with_context(|| format!("Failed to read {}", file.display()))?;
    let filename = file
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .context("Ingest path has no file name")?;

    let payload = match mode {
        IngestMode::Fields => {
            let items: Vec<FieldItem> = serde_json::from_str(&contents)
                .context("Fields file must be a JSON array of {product, field, text}")?;
            IngestPayload::Fields { items }
        }
        IngestMode::Text => IngestPayload::Text {
            text: contents,
            product,
        },
    };

    Ok(IngestRequest {
        filename,
        visitor_id: visitor_id.to_string(),
        payload,
    })
}

#[inline]
pub async fn ingest_file(
    tenant_id: &str,
    file: &Path,
    mode: IngestMode,
    visitor_id: &str,
    product: Option<String>,
) -> Result<()> {
    let request = read_ingest_request(file, mode, visitor_id, product)?;

    let config = Config::load_default()?;
    let database = open_database(&config).await?;
    let vectors = VectorStore::new(&config.vector_database_path())
        .await
        .context("Failed to open the vector store")?;
    let ollama = OllamaClient::new(&config.ollama)?;

    let bar = ProgressBar::new(0).with_style(
        ProgressStyle::with_template("{spinner} [{pos}/{len}] Embedding {msg}")
            .expect("style template is valid"),
    );
    bar.set_message(request.filename.clone());
    bar.enable_steady_tick(Duration::from_millis(120));

    let ingestor = Ingestor::new(
        &database,
        &vectors,
        &ollama,
        config.limits.free_upload_limit,
        config.retrieval.text_chunk_chars,
        PipelineSettings::from_config(&config).call_timeout,
    );
    let result = ingestor
        .ingest_with_progress(tenant_id, &request, |done, total| {
            bar.set_length(total as u64);
            bar.set_position(done as u64);
        })
        .await;
    bar.finish_and_clear();

    let report = result.with_context(|| format!("Failed to ingest {}", file.display()))?;
    println!(
        "Stored {} records from {} ({} skipped)",
        report.records, request.filename, report.skipped
    );
    Ok(())
}
