use facescan_core::IndexError;
use facescan_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("extractor produces {extractor}-dim embeddings but the index holds {index}-dim")]
    DimensionMismatch { extractor: usize, index: usize },
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
    #[error("failed to start worker pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("{unflushed} embeddings could not be written at shutdown: {source}")]
    Persistence {
        unflushed: usize,
        #[source]
        source: StoreError,
    },
    #[error("stage thread {0} panicked")]
    StagePanicked(String),
}
