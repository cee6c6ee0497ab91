use kbrecall::cli::{Cli, Commands, ConfigAction};
use kbrecall::config::Config;
use kbrecall::embedding::{
    BatchProcessor, EmbeddingModels, EmbeddingProvider, FastEmbedProvider, HfTokenizer,
    HnswParams, ImportCollection, KeywordIndex, TokenCounter, VectorIndex,
};
use kbrecall::error::{KbError, Result};
use kbrecall::retrieval::{
    DatasetSearcher, FastEmbedReranker, RerankBackend, SearchBackends, SearchMode, SearchRequest,
    SearchResult, SearchTestRequest,
};
use kbrecall::storage::StorageManager;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    // Handle commands
    match cli.command {
        Commands::Search {
            query,
            team,
            datasets,
            limit,
            similarity,
            mode,
            rerank,
            extensions,
            file_tag,
            json,
        } => {
            let config = load_config(cli.config)?;
            let mut queries = vec![query];
            queries.extend(extensions);

            let mut request =
                SearchRequest::new(team, config.embedding.model.clone(), datasets, queries);
            request.limit = limit
                .unwrap_or(config.search.default_token_budget)
                .min(config.search.max_token_budget);
            request.similarity = similarity;
            request.search_mode = SearchMode::parse_lenient(mode.as_deref());
            request.using_rerank = rerank;
            request.file_tag = file_tag;

            cmd_search(&config, request, json)?;
        }
        Commands::Test { request } => {
            let config = load_config(cli.config)?;
            cmd_test(&config, &request)?;
        }
        Commands::Import { file } => {
            let config = load_config(cli.config)?;
            cmd_import(&config, &file)?;
        }
        Commands::Status => {
            let config = load_config(cli.config)?;
            cmd_status(&config)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "kbrecall=debug" } else { "kbrecall=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Runtime::new().map_err(|e| KbError::Io {
        source: e,
        context: "Failed to create tokio runtime".to_string(),
    })
}

/// Open stores and load models for search and import
struct Backends {
    storage: StorageManager,
    provider: Arc<dyn EmbeddingProvider>,
    tokenizer: Arc<dyn TokenCounter>,
    vector_index: Arc<VectorIndex>,
    keyword_index: Arc<KeywordIndex>,
}

impl Backends {
    fn open(config: &Config) -> Result<Self> {
        let storage = StorageManager::new(expand_path(&config.storage.data_dir)?)?;

        let tokenizer = match &config.tokenizer.file {
            Some(file) => HfTokenizer::from_file(&expand_path(file)?),
            None => HfTokenizer::from_pretrained(&config.tokenizer.repo),
        }
        .map_err(|e| KbError::Config(e.to_string()))?;
        let tokenizer: Arc<dyn TokenCounter> = Arc::new(tokenizer);

        let provider = FastEmbedProvider::new(&config.embedding.model, Arc::clone(&tokenizer))
            .map_err(|e| KbError::Config(e.to_string()))?;

        let embeddings = storage.database.load_embeddings(provider.model_name())?;
        let params = HnswParams {
            m: config.indexing.hnsw_m,
            ef_construction: config.indexing.hnsw_ef_construction,
            ef_search: config.indexing.hnsw_ef_search,
            max_elements: config.indexing.max_elements,
        };
        let vector_index = VectorIndex::from_embeddings(provider.dimension(), params, embeddings)
            .map_err(|e| KbError::Index(e.to_string()))?;

        let keyword_index = KeywordIndex::new(storage.keyword_index_dir())
            .map_err(|e| KbError::Index(e.to_string()))?;

        Ok(Self {
            storage,
            provider: Arc::new(provider),
            tokenizer,
            vector_index: Arc::new(vector_index),
            keyword_index: Arc::new(keyword_index),
        })
    }

    fn searcher(&self, config: &Config) -> DatasetSearcher {
        let reranker: Option<Arc<dyn RerankBackend>> = if config.rerank.enabled {
            match FastEmbedReranker::new(&config.rerank.model) {
                Ok(reranker) => Some(Arc::new(reranker)),
                Err(e) => {
                    tracing::warn!("Reranker unavailable, searching without it: {}", e);
                    None
                }
            }
        } else {
            None
        };

        let database = Arc::new(self.storage.database.clone());

        DatasetSearcher::new(
            SearchBackends {
                embedding_models: EmbeddingModels::new(Arc::clone(&self.provider)),
                vector_store: self.vector_index.clone(),
                lexical_engine: self.keyword_index.clone(),
                chunk_store: database.clone(),
                collection_store: database,
                reranker,
                tokenizer: Arc::clone(&self.tokenizer),
            },
            config.search.clone(),
        )
    }
}

fn cmd_search(config: &Config, request: SearchRequest, json: bool) -> Result<()> {
    let backends = Backends::open(config)?;
    let searcher = backends.searcher(config);

    let result = runtime()?.block_on(searcher.search(&request))?;

    if json {
        println!("{}", to_json(&result)?);
    } else {
        print_result(&result);
    }

    Ok(())
}

fn cmd_test(config: &Config, path: &Path) -> Result<()> {
    let content = if path == Path::new("-") {
        let mut buffer = String::new();
        std::io::stdin()
            .read_to_string(&mut buffer)
            .map_err(|e| KbError::Io {
                source: e,
                context: "Failed to read request from stdin".to_string(),
            })?;
        buffer
    } else {
        std::fs::read_to_string(path).map_err(|e| KbError::Io {
            source: e,
            context: format!("Failed to read request file: {:?}", path),
        })?
    };

    let request: SearchTestRequest = serde_json::from_str(&content).map_err(|e| KbError::Json {
        source: e,
        context: "Invalid search test request".to_string(),
    })?;

    let backends = Backends::open(config)?;
    let searcher = backends.searcher(config);
    let response = runtime()?.block_on(searcher.search_test(request))?;

    println!("{}", to_json(&response)?);
    Ok(())
}

fn cmd_import(config: &Config, path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(path).map_err(|e| KbError::Io {
        source: e,
        context: format!("Failed to read import file: {:?}", path),
    })?;

    let mut collections = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let collection: ImportCollection =
            serde_json::from_str(line).map_err(|e| KbError::Json {
                source: e,
                context: format!("Invalid record on line {}", line_no + 1),
            })?;
        collections.push(collection);
    }

    let backends = Backends::open(config)?;
    let processor = BatchProcessor::new(
        backends.storage.database.clone(),
        Arc::clone(&backends.provider),
        Arc::clone(&backends.vector_index),
        Arc::clone(&backends.keyword_index),
        config.embedding.batch_size,
    );

    let result = runtime()?.block_on(processor.process(collections))?;

    println!("✓ Imported {} collections", result.collections);
    println!("  Chunks:  {}", result.chunks);
    println!("  Vectors: {}", result.vectors);
    if result.failed > 0 {
        println!("  ⚠ Failed to embed: {}", result.failed);
    }
    println!("  Took {}ms", result.duration_ms);

    Ok(())
}

fn cmd_status(config: &Config) -> Result<()> {
    let storage = StorageManager::new(expand_path(&config.storage.data_dir)?)?;
    let stats = storage.database.stats()?;
    let keyword_index =
        KeywordIndex::new(storage.keyword_index_dir()).map_err(|e| KbError::Index(e.to_string()))?;

    println!("kbrecall Status");
    println!("===============");
    println!("\nStore: {}", storage.store_dir().display());
    println!("  Collections:   {}", stats.collection_count);
    println!("  Chunks:        {}", stats.chunk_count);
    println!("  Chunk indexes: {}", stats.index_count);
    println!("  Embeddings:    {}", stats.embedding_count);
    println!("  Keyword docs:  {}", keyword_index.len());
    println!("\nEmbedding model: {}", config.embedding.model);
    println!(
        "Reranker: {}",
        if config.rerank.enabled {
            config.rerank.model.as_str()
        } else {
            "disabled"
        }
    );

    Ok(())
}

fn cmd_config(config_path: Option<PathBuf>, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path)?;
            let value = serde_json::to_value(&config).map_err(|e| KbError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let value = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    KbError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };

            println!("{}", to_json(&value)?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| KbError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let config = Config::default();
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'kbrecall config init' to create one."
        );
        let mut config = Config::default();
        config.apply_env_overrides();
        return Ok(config);
    }

    Config::load(&path)
}

fn print_result(result: &SearchResult) {
    println!(
        "{} results (mode: {}, rerank: {}, similarity filter: {}, embedding tokens: {})",
        result.search_results.len(),
        result.search_mode.as_str(),
        result.using_rerank,
        result.using_similarity_filter,
        result.tokens
    );

    for (i, chunk) in result.search_results.iter().enumerate() {
        let scores: Vec<String> = chunk
            .scores
            .iter()
            .map(|s| format!("{:?}={:.4}", s.score_type, s.value))
            .collect();

        println!(
            "\n{}. {} [{}] ({})",
            i + 1,
            chunk.source.source_name,
            chunk.id,
            scores.join(", ")
        );
        println!("   Q: {}", chunk.q);
        if !chunk.a.is_empty() {
            println!("   A: {}", chunk.a);
        }
    }
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| KbError::Json {
        source: e,
        context: "Failed to serialize output".to_string(),
    })
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| KbError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| KbError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}
