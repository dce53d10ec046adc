//! Stage wiring and lifecycle.
//!
//! ```text
//! submit ─▶ images ─▶ detection ×N ─▶ detected ─▶ extraction ─┬▶ writes ─▶ writer
//!                                                             └▶ recognition ─▶ results ─▶ collector
//! train ──▶ training ─▶ trainer
//! ```
//!
//! Shutdown cascades: each channel is canceled when its last producer
//! exits, so every stage drains its input before stopping.

use crate::channel::{BoundedChannel, Producer};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::events::{Progress, ProgressSnapshot};
use crate::package::{FaceEmbedding, PipelinePackage};
use crate::stages::{DetectionStage, ExtractionStage, RecognitionStage, TrainerStage, WriteSummary, WriterStage};
use facescan_core::{Detector, Extractor, ImageItem, ImageSource, NearestNeighborRecognizer};
use facescan_store::{EmbeddingCache, EmbeddingIndex, EmbeddingStore, IdentityStore, SqliteFaceDb};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Storage services shared by the stages, constructed once and passed in.
#[derive(Clone)]
pub struct FaceServices {
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub identities: Arc<dyn IdentityStore>,
    pub index: Arc<EmbeddingIndex>,
    pub cache: Arc<EmbeddingCache>,
    database: Option<Arc<SqliteFaceDb>>,
}

impl FaceServices {
    pub fn new(
        embeddings: Arc<dyn EmbeddingStore>,
        identities: Arc<dyn IdentityStore>,
        index: Arc<EmbeddingIndex>,
        cache: Arc<EmbeddingCache>,
    ) -> Self {
        Self { embeddings, identities, index, cache, database: None }
    }

    /// Services over one SQLite database. The KD-tree snapshot is saved back
    /// to it when a pipeline finishes.
    pub fn open(db: Arc<SqliteFaceDb>, dimension: usize, config: &PipelineConfig) -> Result<Self, PipelineError> {
        let index = Arc::new(EmbeddingIndex::open(&db, dimension)?);
        let cache = Arc::new(EmbeddingCache::new(
            db.clone(),
            config.context.clone(),
            config.projection_max_items,
        ));
        Ok(Self {
            embeddings: db.clone(),
            identities: db.clone(),
            index,
            cache,
            database: Some(db),
        })
    }

    pub fn persist_index(&self) -> Result<(), PipelineError> {
        if let Some(db) = &self.database {
            self.index.persist(db)?;
        }
        Ok(())
    }
}

/// Black-box collaborators driving detection and extraction.
#[derive(Clone)]
pub struct Collaborators {
    pub source: Arc<dyn ImageSource>,
    pub detector: Arc<dyn Detector>,
    pub extractor: Arc<dyn Extractor>,
}

/// What a finished pipeline produced.
#[derive(Debug)]
pub struct PipelineReport {
    /// Packages that went through recognition, in completion order.
    pub recognized: Vec<PipelinePackage>,
    /// Packages handed to [`FacePipeline::train`].
    pub trained: Vec<PipelinePackage>,
    pub write: WriteSummary,
    pub progress: ProgressSnapshot,
}

trait Cancel: Send + Sync {
    fn cancel(&self);
}

impl<T: Send> Cancel for BoundedChannel<T> {
    fn cancel(&self) {
        BoundedChannel::cancel(self)
    }
}

pub struct FacePipeline {
    images: Option<Producer<ImageItem>>,
    training: Option<Producer<PipelinePackage>>,
    channels: Vec<Arc<dyn Cancel>>,
    stages: Vec<(String, JoinHandle<()>)>,
    collector: JoinHandle<Vec<PipelinePackage>>,
    trainer: JoinHandle<Vec<PipelinePackage>>,
    writer: JoinHandle<Result<WriteSummary, PipelineError>>,
    progress: Arc<Progress>,
    services: FaceServices,
}

impl FacePipeline {
    /// Validate the configuration, build the recognizer from the cached
    /// trained embeddings and spawn every stage thread.
    pub fn start(
        config: &PipelineConfig,
        collaborators: Collaborators,
        services: FaceServices,
        progress: Arc<Progress>,
    ) -> Result<Self, PipelineError> {
        config.validate()?;

        let dimension = services.index.dimension();
        let extractor_dimension = collaborators.extractor.dimension();
        if extractor_dimension != dimension {
            return Err(PipelineError::DimensionMismatch { extractor: extractor_dimension, index: dimension });
        }

        let snapshot = services.cache.get()?;
        let recognizer = NearestNeighborRecognizer::train(
            dimension,
            snapshot.known_pairs(),
            config.recognition_threshold,
            config.recognition_neighbors,
        )?;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.extraction_workers)
            .thread_name(|i| format!("facescan-extract-{i}"))
            .build()?;

        let capacity = config.channel_capacity;
        let images: Arc<BoundedChannel<ImageItem>> = Arc::new(BoundedChannel::new(capacity));
        let detected: Arc<BoundedChannel<PipelinePackage>> = Arc::new(BoundedChannel::new(capacity));
        let writes: Arc<BoundedChannel<FaceEmbedding>> = Arc::new(BoundedChannel::new(capacity));
        let to_recognition: Arc<BoundedChannel<PipelinePackage>> = Arc::new(BoundedChannel::new(capacity));
        let results: Arc<BoundedChannel<PipelinePackage>> = Arc::new(BoundedChannel::new(capacity));
        let training: Arc<BoundedChannel<PipelinePackage>> = Arc::new(BoundedChannel::new(capacity));
        let channels: Vec<Arc<dyn Cancel>> = vec![
            images.clone() as Arc<dyn Cancel>,
            detected.clone() as Arc<dyn Cancel>,
            writes.clone() as Arc<dyn Cancel>,
            to_recognition.clone() as Arc<dyn Cancel>,
            results.clone() as Arc<dyn Cancel>,
            training.clone() as Arc<dyn Cancel>,
        ];

        let images_producer = Producer::new(images.clone());
        let training_producer = Producer::new(training.clone());
        let mut stages = Vec::new();

        let detection = DetectionStage::new(
            collaborators.source,
            collaborators.detector,
            progress.clone(),
            config.min_confidence,
            config.nms_threshold,
        );
        let detected_producer = Producer::new(detected.clone());
        for i in 0..config.detection_workers {
            let stage = detection.clone();
            let input = images.clone();
            let output = detected_producer.clone();
            let name = format!("facescan-detect-{i}");
            stages.push((name.clone(), spawn(name, move || stage.run(input, output))?));
        }
        drop(detected_producer);

        let extraction = ExtractionStage::new(
            collaborators.extractor,
            Arc::new(pool),
            progress.clone(),
            config.patch_size,
            dimension,
        );
        let (input, write_output, recognition_output) =
            (detected.clone(), Producer::new(writes.clone()), Producer::new(to_recognition.clone()));
        stages.push((
            "facescan-extract".into(),
            spawn("facescan-extract".into(), move || extraction.run(input, write_output, recognition_output))?,
        ));

        let recognition = RecognitionStage::new(Arc::new(recognizer), progress.clone());
        let (input, output) = (to_recognition.clone(), Producer::new(results.clone()));
        stages.push((
            "facescan-recognize".into(),
            spawn("facescan-recognize".into(), move || recognition.run(input, output))?,
        ));

        let writer = WriterStage::new(
            services.embeddings.clone(),
            services.index.clone(),
            services.cache.clone(),
            progress.clone(),
            config.write_batch_size,
            config.context.clone(),
        );
        let input = writes.clone();
        let writer = spawn("facescan-write".into(), move || writer.run(input))?;

        let trainer = TrainerStage::new(
            services.identities.clone(),
            services.embeddings.clone(),
            services.index.clone(),
            services.cache.clone(),
            progress.clone(),
            config.context.clone(),
        );
        let input = training.clone();
        let trainer = spawn("facescan-train".into(), move || trainer.run(input))?;

        let input = results.clone();
        let collector = spawn("facescan-collect".into(), move || {
            let mut done = Vec::new();
            while let Some(package) = input.read() {
                done.push(package);
            }
            done
        })?;

        tracing::info!(
            dimension,
            trained = snapshot.known_pairs().len(),
            detection_workers = config.detection_workers,
            extraction_workers = config.extraction_workers,
            batch_size = config.write_batch_size,
            context = %config.context,
            "face pipeline started"
        );

        Ok(Self {
            images: Some(images_producer),
            training: Some(training_producer),
            channels,
            stages,
            collector,
            trainer,
            writer,
            progress,
            services,
        })
    }

    /// Queue an image for detection. Blocks while the queue is full;
    /// returns false once the pipeline is canceled.
    pub fn submit(&self, item: ImageItem) -> bool {
        self.images.as_ref().is_some_and(|p| p.append(item))
    }

    /// Queue a package of confirmed regions for the trainer.
    pub fn train(&self, package: PipelinePackage) -> bool {
        self.training.as_ref().is_some_and(|p| p.append(package))
    }

    pub fn progress(&self) -> ProgressSnapshot {
        self.progress.snapshot()
    }

    /// Abort: cancel every channel. Stages drain what is already queued
    /// and exit; [`finish`](Self::finish) still collects their results.
    pub fn cancel(&self) {
        tracing::info!("face pipeline canceled");
        for channel in &self.channels {
            channel.cancel();
        }
    }

    /// Close the inputs, wait for every stage to drain and exit, then save
    /// the KD-tree snapshot.
    pub fn finish(mut self) -> Result<PipelineReport, PipelineError> {
        drop(self.images.take());
        drop(self.training.take());

        let mut first_error: Option<PipelineError> = None;
        for (name, handle) in self.stages.drain(..) {
            if handle.join().is_err() {
                tracing::error!(stage = %name, "stage thread panicked");
                first_error.get_or_insert(PipelineError::StagePanicked(name));
            }
        }

        let recognized = join("facescan-collect", self.collector, &mut first_error).unwrap_or_default();
        let trained = join("facescan-train", self.trainer, &mut first_error).unwrap_or_default();
        let write = match join("facescan-write", self.writer, &mut first_error) {
            Some(Ok(summary)) => summary,
            Some(Err(e)) => {
                first_error.get_or_insert(e);
                WriteSummary::default()
            }
            None => WriteSummary::default(),
        };

        if let Err(e) = self.services.persist_index() {
            tracing::error!(error = %e, "failed to save kd-tree snapshot");
            first_error.get_or_insert(e);
        }

        let progress = self.progress.snapshot();
        tracing::info!(
            processed = progress.processed,
            saved = progress.saved,
            skipped = progress.skipped,
            trained = progress.trained,
            "face pipeline finished"
        );

        match first_error {
            Some(e) => Err(e),
            None => Ok(PipelineReport { recognized, trained, write, progress }),
        }
    }
}

fn spawn<T, F>(name: String, f: F) -> Result<JoinHandle<T>, PipelineError>
where
    T: Send + 'static,
    F: FnOnce() -> T + Send + 'static,
{
    Ok(thread::Builder::new().name(name).spawn(f)?)
}

fn join<T>(name: &str, handle: JoinHandle<T>, first_error: &mut Option<PipelineError>) -> Option<T> {
    match handle.join() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!(stage = name, "stage thread panicked");
            first_error.get_or_insert(PipelineError::StagePanicked(name.to_string()));
            None
        }
    }
}
