//! CLI commands

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use tenantql_duck::{DuckExecutor, DuckMappingStore, DuckSchemaStore};
use tenantql_engine::relationships::{edges_for, infer_edges};
use tenantql_engine::{
    load_canonical_file, GenerationBackend, JsonFileMappingStore, MappingStore, MemoryMappingStore, SchemaStore,
    TranslationEngine, YamlSchemaStore,
};

use crate::config::{Config, MappingStoreKind, SchemaSource};
use crate::llm::{OpenAiBackend, UnconfiguredBackend};

#[derive(Debug, Parser)]
#[command(name = "tenantql", version, about = "Translate canonical SQL into tenant-specific SQL")]
pub struct Cli {
    /// Configuration file; defaults apply when it does not exist
    #[arg(long, short, default_value = "config.yaml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Translate a canonical query for one tenant
    Translate {
        #[arg(long)]
        tenant: String,
        /// Canonical SQL, or `-` to read it from stdin
        #[arg(long)]
        query: String,
    },
    /// Translate, then run the result against the tenant database
    Execute {
        #[arg(long)]
        tenant: String,
        #[arg(long)]
        query: String,
    },
    /// Inspect or invalidate cached mappings
    Mappings {
        #[command(subcommand)]
        action: MappingsCommand,
    },
    /// Show the join edges inferred for a tenant schema
    Joins {
        #[arg(long)]
        tenant: String,
        /// Only edges touching this table
        #[arg(long)]
        table: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum MappingsCommand {
    Show {
        #[arg(long)]
        tenant: String,
    },
    Clear {
        #[arg(long)]
        tenant: String,
    },
    Refresh {
        #[arg(long)]
        tenant: String,
    },
}

pub async fn run(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Translate { tenant, query } => {
            let engine = build_engine(config).await?;
            let result = engine.translate(&read_query(query)?, &tenant).await?;
            print_json(&result)
        }
        Command::Execute { tenant, query } => {
            let engine = build_engine(config).await?;
            let executor = DuckExecutor::new(&config.storage.database_dir, config.execution);
            let run = engine
                .translate_and_execute(&read_query(query)?, &tenant, &executor)
                .await?;
            print_json(&run)
        }
        Command::Mappings { action } => {
            let engine = build_engine(config).await?;
            match action {
                MappingsCommand::Show { tenant } => match engine.cached_mappings(&tenant).await? {
                    Some(mappings) => print_json(&mappings),
                    None => anyhow::bail!("no cached mappings for tenant '{}'", tenant),
                },
                MappingsCommand::Clear { tenant } => {
                    let cleared = engine.clear_mappings(&tenant).await?;
                    print_json(&serde_json::json!({ "tenant_id": tenant, "cleared": cleared }))
                }
                MappingsCommand::Refresh { tenant } => print_json(&engine.refresh_mappings(&tenant).await?),
            }
        }
        Command::Joins { tenant, table } => {
            let schema = schema_store(config).load(&tenant).await?;
            let edges = infer_edges(&schema);
            match table {
                Some(table) => print_json(&edges_for(&edges, &table).collect::<Vec<_>>()),
                None => print_json(&edges),
            }
        }
    }
}

fn read_query(query: String) -> anyhow::Result<String> {
    if query != "-" {
        return Ok(query);
    }
    let mut buffer = String::new();
    std::io::stdin()
        .read_to_string(&mut buffer)
        .context("failed to read query from stdin")?;
    Ok(buffer)
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn schema_store(config: &Config) -> Arc<dyn SchemaStore> {
    match config.storage.schema_source {
        SchemaSource::Yaml => Arc::new(YamlSchemaStore::new(&config.storage.schema_dir)),
        SchemaSource::Duckdb => Arc::new(DuckSchemaStore::new(&config.storage.database_dir)),
    }
}

async fn mapping_store(config: &Config) -> anyhow::Result<Arc<dyn MappingStore>> {
    let path = &config.storage.mapping_path;
    Ok(match config.storage.mapping_store {
        MappingStoreKind::Memory => Arc::new(MemoryMappingStore::new()),
        MappingStoreKind::Json => Arc::new(
            JsonFileMappingStore::open(path)
                .await
                .with_context(|| format!("failed to open mapping cache {}", path.display()))?,
        ),
        MappingStoreKind::Duckdb => Arc::new(
            DuckMappingStore::open(path)
                .with_context(|| format!("failed to open mapping store {}", path.display()))?,
        ),
    })
}

fn backend(config: &Config) -> Arc<dyn GenerationBackend> {
    match Config::openai_api_key() {
        Ok(key) => {
            tracing::info!(model = %config.llm.model, "Using OpenAI generation backend");
            Arc::new(OpenAiBackend::new(key, config.llm.clone()))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Generation backend not configured");
            Arc::new(UnconfiguredBackend)
        }
    }
}

async fn build_engine(config: &Config) -> anyhow::Result<TranslationEngine> {
    let mut engine = TranslationEngine::new(
        schema_store(config),
        mapping_store(config).await?,
        backend(config),
        config.engine.clone(),
    );
    // only DuckDB tenants have rows to show
    if config.storage.schema_source == SchemaSource::Duckdb {
        engine = engine.with_samples(Arc::new(DuckExecutor::new(
            &config.storage.database_dir,
            config.execution,
        )));
    }
    match &config.storage.canonical_path {
        Some(path) => {
            let canonical = load_canonical_file(path)
                .await
                .with_context(|| format!("failed to load canonical vocabulary {}", path.display()))?;
            Ok(engine.with_canonical(canonical))
        }
        None => Ok(engine),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_translate() {
        let cli = Cli::parse_from([
            "tenantql",
            "translate",
            "--tenant",
            "acme",
            "--query",
            "SELECT title FROM contracts",
        ]);
        assert_eq!(cli.config, PathBuf::from("config.yaml"));
        assert!(matches!(
            cli.command,
            Command::Translate { ref tenant, ref query } if tenant == "acme" && query == "SELECT title FROM contracts"
        ));
    }

    #[test]
    fn test_parse_mappings_refresh() {
        let cli = Cli::parse_from(["tenantql", "-c", "prod.yaml", "mappings", "refresh", "--tenant", "globex"]);
        assert_eq!(cli.config, PathBuf::from("prod.yaml"));
        assert!(matches!(
            cli.command,
            Command::Mappings {
                action: MappingsCommand::Refresh { ref tenant }
            } if tenant == "globex"
        ));
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["tenantql", "serve"]).is_err());
    }

    #[tokio::test]
    async fn test_memory_store_engine_builds() {
        let mut config = Config::default();
        config.storage.mapping_store = MappingStoreKind::Memory;
        let engine = build_engine(&config).await.unwrap();
        assert_eq!(engine.canonical().version, "1");
    }
}
