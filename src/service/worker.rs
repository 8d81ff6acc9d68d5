//! Single worker that owns the loaded pipeline and serializes generation

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info};

use crate::pipeline::{encode_png, DiffusionPipeline, PipelineInfo, PipelineParams};

/// Reasons a submitted job did not produce an image
#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("generation queue is full")]
    QueueFull,

    #[error("generation worker is not running")]
    Stopped,

    #[error("{0}")]
    Pipeline(#[from] anyhow::Error),
}

/// Job with its response channel
struct GenerationJob {
    params: PipelineParams,
    response_tx: oneshot::Sender<anyhow::Result<Vec<u8>>>,
}

/// Handle to the worker thread
pub struct GenerationWorker {
    job_tx: mpsc::Sender<GenerationJob>,
    info: PipelineInfo,
    completed: Arc<AtomicU64>,
}

impl GenerationWorker {
    /// Move the pipeline onto a dedicated thread fed by a bounded queue
    pub fn spawn(
        pipeline: Box<dyn DiffusionPipeline>,
        queue_capacity: usize,
    ) -> std::io::Result<Self> {
        let (job_tx, job_rx) = mpsc::channel(queue_capacity.max(1));
        let info = pipeline.info();
        let completed = Arc::new(AtomicU64::new(0));
        let counter = completed.clone();

        thread::Builder::new()
            .name("diffusion-worker".to_string())
            .spawn(move || Self::run(pipeline, job_rx, counter))?;

        info!(
            model = %info.model,
            device = %info.device,
            queue_capacity = queue_capacity,
            "Started generation worker"
        );

        Ok(Self {
            job_tx,
            info,
            completed,
        })
    }

    fn run(
        mut pipeline: Box<dyn DiffusionPipeline>,
        mut job_rx: mpsc::Receiver<GenerationJob>,
        completed: Arc<AtomicU64>,
    ) {
        while let Some(job) = job_rx.blocking_recv() {
            if job.response_tx.is_closed() {
                debug!(seed = job.params.seed, "Skipping job whose caller went away");
                continue;
            }

            let started = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                pipeline
                    .generate(&job.params)
                    .and_then(|image| encode_png(&image))
            }))
            .unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "Pipeline panicked during generation");
                Err(anyhow::anyhow!("pipeline panicked: {}", message))
            });

            completed.fetch_add(1, Ordering::Relaxed);
            debug!(
                seed = job.params.seed,
                ok = outcome.is_ok(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generation job finished"
            );
            let _ = job.response_tx.send(outcome);
        }

        info!("Generation worker stopped");
    }

    /// Queue a job and wait for its PNG bytes
    pub async fn submit(&self, params: PipelineParams) -> Result<Vec<u8>, WorkerError> {
        let (response_tx, response_rx) = oneshot::channel();

        self.job_tx
            .try_send(GenerationJob {
                params,
                response_tx,
            })
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => WorkerError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => WorkerError::Stopped,
            })?;

        match response_rx.await {
            Ok(result) => result.map_err(WorkerError::Pipeline),
            Err(_) => Err(WorkerError::Stopped),
        }
    }

    pub fn info(&self) -> &PipelineInfo {
        &self.info
    }

    /// Jobs waiting behind the one being sampled
    pub fn queued(&self) -> usize {
        self.job_tx.max_capacity() - self.job_tx.capacity()
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
