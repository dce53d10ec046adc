//! Pipeline stages. Each runs on its own thread and talks to its
//! neighbours only through [`BoundedChannel`](crate::channel::BoundedChannel)s.

pub mod detection;
pub mod extraction;
pub mod recognition;
pub mod trainer;
pub mod writer;

pub use detection::DetectionStage;
pub use extraction::ExtractionStage;
pub use recognition::RecognitionStage;
pub use trainer::TrainerStage;
pub use writer::{WriteSummary, WriterStage};
