use clap::{Parser, Subcommand};
use std::path::PathBuf;
use storebot::commands::{
    IngestMode, create_tenant, import_keywords, ingest_file, list_tenants, serve, set_tenant_plan,
};
use storebot::config::{get_config_dir, run_interactive_config, show_config};

#[derive(Parser)]
#[command(name = "storebot")]
#[command(about = "Multi-tenant product chatbot backend with keyword-aware retrieval")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Configure Ollama, server, limits and WhatsApp settings
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
    /// Start the HTTP API
    Serve,
    /// Manage tenants
    Tenant {
        #[command(subcommand)]
        action: TenantAction,
    },
    /// Manage a tenant's product keyword table
    Keywords {
        #[command(subcommand)]
        action: KeywordAction,
    },
    /// Embed a product file into a tenant's vector store
    Ingest {
        /// Tenant ID
        tenant: String,
        /// File to ingest
        file: PathBuf,
        /// How to read the file
        #[arg(long, value_enum, default_value = "fields")]
        mode: IngestMode,
        /// Visitor id recorded on the stored records
        #[arg(long, default_value = "admin")]
        visitor: String,
        /// Product name attached to every text chunk
        #[arg(long)]
        product: Option<String>,
    },
}

#[derive(Subcommand)]
enum TenantAction {
    /// Create a tenant and print its API key
    Create {
        name: String,
        /// Start on the paid plan
        #[arg(long)]
        paid: bool,
    },
    /// List all tenants with usage
    List,
    /// Change a tenant's plan
    Plan {
        tenant: String,
        /// Move to the paid plan (omit to move back to free)
        #[arg(long)]
        paid: bool,
    },
}

#[derive(Subcommand)]
enum KeywordAction {
    /// Replace the keyword table from a JSON file
    Import { tenant: String, file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { show } => {
            let config_dir = get_config_dir()?;
            if show {
                show_config(&config_dir)?;
            } else {
                run_interactive_config(&config_dir)?;
            }
        }
        Commands::Serve => serve().await?,
        Commands::Tenant { action } => match action {
            TenantAction::Create { name, paid } => create_tenant(&name, paid).await?,
            TenantAction::List => list_tenants().await?,
            TenantAction::Plan { tenant, paid } => set_tenant_plan(&tenant, paid).await?,
        },
        Commands::Keywords {
            action: KeywordAction::Import { tenant, file },
        } => import_keywords(&tenant, &file).await?,
        Commands::Ingest {
            tenant,
            file,
            mode,
            visitor,
            product,
        } => ingest_file(&tenant, &file, mode, &visitor, product).await?,
    }

    Ok(())
}
