//! Threaded face pipeline: detection, extraction, batched persistence,
//! recognition and training, connected by bounded channels.

pub mod channel;
pub mod config;
pub mod error;
pub mod events;
pub mod package;
pub mod pipeline;
pub mod stages;

pub use channel::{BoundedChannel, Producer};
pub use config::PipelineConfig;
pub use error::PipelineError;
pub use events::{PipelineEvent, Progress, ProgressSnapshot};
pub use package::{FaceEmbedding, PipelinePackage, ProcessFlags};
pub use pipeline::{Collaborators, FaceServices, FacePipeline, PipelineReport};
pub use stages::{DetectionStage, ExtractionStage, RecognitionStage, TrainerStage, WriteSummary, WriterStage};
