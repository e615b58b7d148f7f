use anyhow::Result;
use clap::Parser;
use requetier::catalog::QueryCatalog;
use requetier::chroma::ChromaHttpStore;
use requetier::config::Config;
use requetier::executor::{SqlxProbe, SyntaxProbe};
use requetier::llm::HfTextGenClient;
use requetier::resolver::{Resolver, Thresholds};
use requetier::vector_store::{InMemoryVectorStore, VectorStore};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "requetier")]
#[command(about = "Question resolution and SQL synthesis engine")]
struct Args {
    /// The business question in natural language
    question: String,

    /// Path to the predefined query catalog (default: from QUERIES_FOLDER)
    #[arg(short, long)]
    queries_dir: Option<PathBuf>,

    /// Hugging Face API key (or set HUGGINGFACE_API_KEY env var)
    #[arg(long)]
    api_key: Option<String>,

    /// Run against the in-memory vector store instead of Chroma
    #[arg(long)]
    offline: bool,

    /// Drop journal entries and learned cache entries older than this many
    /// days before resolving
    #[arg(long)]
    prune_days: Option<i64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt::init();

    let args = Args::parse();
    let config = Config::from_env()?;

    info!("Question resolution engine starting...");
    info!("Question: {}", args.question);

    let queries_dir = args
        .queries_dir
        .unwrap_or_else(|| PathBuf::from(&config.queries_dir));
    let catalog = Arc::new(QueryCatalog::open(queries_dir)?);

    let store: Arc<dyn VectorStore> = if args.offline {
        info!("Offline mode, using the in-memory vector store");
        Arc::new(InMemoryVectorStore::new())
    } else {
        Arc::new(ChromaHttpStore::new(&config.chroma_url))
    };

    let api_key = args.api_key.or(config.api_key).unwrap_or_default();
    if api_key.is_empty() {
        warn!("No Hugging Face API key configured, fresh generation will be refused upstream");
    }
    let generator = Arc::new(HfTextGenClient::new(&config.model_url, &api_key));

    let mut resolver =
        Resolver::new(store, generator, catalog).with_thresholds(Thresholds {
            lexical: config.similarity_threshold,
            ..Thresholds::default()
        });

    if let Some(database_url) = &config.database_url {
        match SqlxProbe::connect(database_url).await {
            Ok(probe) => resolver = resolver.with_probe(Arc::new(probe)),
            Err(e) => warn!("Database probe unavailable, cache hits will not be verified: {}", e),
        }
    } else {
        resolver = resolver.with_probe(Arc::new(SyntaxProbe));
    }

    let seeded = resolver.seed_catalog().await?;
    if seeded > 0 {
        info!("{} catalog entries seeded into the cache", seeded);
    }

    if let Some(days) = args.prune_days {
        let removed = resolver.prune_cache(chrono::Duration::days(days)).await?;
        info!("{} stale cache entries pruned", removed);
    }

    let answer = resolver.resolve(&args.question).await?;

    println!("\n=== Resolution ===");
    println!("{}", serde_json::to_string_pretty(&answer)?);

    Ok(())
}
