use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use facescan_core::{Attributes, IdentityId, TagKey};
use facescan_pipeline::PipelineConfig;
use facescan_store::{EmbeddingIndex, EmbeddingStore, IdentityStore, SqliteFaceDb};
use serde_json::json;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "facescan", about = "Face database management")]
struct Cli {
    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Face database path (overrides the configuration)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Training context (overrides the configuration)
    #[arg(long, global = true)]
    context: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known identities
    Identities,
    /// Create an identity, or return the one matching its uuid
    AddIdentity {
        /// Attributes as key=value (e.g. name=Alice)
        #[arg(required = true, value_parser = parse_attribute)]
        attributes: Vec<(String, String)>,
    },
    /// Delete an identity and all of its embeddings
    RemoveIdentity { id: IdentityId },
    /// Remove training data in the current context
    Clear {
        /// Only this identity's embeddings
        #[arg(long)]
        identity: Option<IdentityId>,
        /// Every context, not just the current one
        #[arg(long)]
        all_contexts: bool,
    },
    /// Show database statistics
    Stats,
    /// Rebuild the KD-tree from the stored embeddings
    RebuildIndex,
    /// Find the stored faces nearest to a stored face
    Search {
        /// Tag key of the query face, e.g. 42/10,20,64,64
        tag_key: String,
        #[arg(long, default_value_t = 1.0)]
        radius: f32,
        #[arg(short = 'n', long, default_value_t = 10)]
        limit: usize,
    },
    /// Check database integrity
    Check {
        /// Compact the database afterwards
        #[arg(long)]
        vacuum: bool,
    },
}

fn parse_attribute(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected key=value, got {raw:?}")),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = PipelineConfig::load(cli.config.as_deref())?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if let Some(context) = cli.context {
        config.context = context;
    }
    tracing::debug!(db = %config.db_path.display(), context = %config.context, "configuration loaded");

    if let Some(dir) = config.db_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create database directory {}", dir.display()))?;
    }
    let db = SqliteFaceDb::open(&config.db_path)
        .with_context(|| format!("failed to open face database {}", config.db_path.display()))?;

    match cli.command {
        Commands::Identities => {
            let identities = db.list_all()?;
            println!("{}", serde_json::to_string_pretty(&identities)?);
        }
        Commands::AddIdentity { attributes } => {
            let attributes: Attributes = attributes.into_iter().collect();
            let identity = db.create(&attributes)?;
            println!("{}", serde_json::to_string_pretty(&identity)?);
        }
        Commands::RemoveIdentity { id } => {
            if !db.delete(id)? {
                bail!("no identity with id {id}");
            }
            println!("Removed identity {id}");
        }
        Commands::Clear { identity, all_contexts } => {
            let context = (!all_contexts).then_some(config.context.as_str());
            let removed = match identity {
                Some(id) => db.delete_by_identity(id, context)?,
                None => db.delete_all(context)?,
            };
            println!("Removed {removed} embeddings");
        }
        Commands::Stats => {
            println!("{}", serde_json::to_string_pretty(&db.stats()?)?);
        }
        Commands::RebuildIndex => {
            let Some(dimension) = db.dimension()? else {
                println!("No embeddings stored, nothing to index");
                return Ok(());
            };
            let index = EmbeddingIndex::new(dimension)?;
            let nodes = index.rebuild(&db)?;
            index.persist(&db)?;
            println!("Indexed {nodes} embeddings");
        }
        Commands::Search { tag_key, radius, limit } => {
            let tag_key = TagKey::from(tag_key);
            let Some(record) = db.find_by_tag_key(&tag_key, &config.context)? else {
                bail!("no embedding stored for {tag_key} in context {:?}", config.context);
            };
            let index = EmbeddingIndex::open(&db, record.embedding.dimension())?;
            let neighbors = index.nearest_neighbors(&record.embedding.values, radius, limit)?;

            let mut results = Vec::with_capacity(neighbors.len());
            for neighbor in neighbors {
                let name = match neighbor.identity {
                    Some(id) => db.get(id)?.and_then(|i| i.name().map(str::to_string)),
                    None => None,
                };
                results.push(json!({
                    "record_id": neighbor.record_id,
                    "identity": neighbor.identity,
                    "name": name,
                    "distance": neighbor.distance,
                }));
            }
            println!("{}", serde_json::to_string_pretty(&json!({ "query": tag_key, "neighbors": results }))?);
            // Keep the freshly built tree for the next run.
            index.persist(&db)?;
        }
        Commands::Check { vacuum } => {
            let problems = db.integrity_check()?;
            for problem in &problems {
                println!("{problem}");
            }
            if vacuum {
                db.vacuum()?;
            }
            if !problems.is_empty() {
                bail!("integrity check found {} problems", problems.len());
            }
            println!("ok");
        }
    }

    Ok(())
}
