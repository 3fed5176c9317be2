use crate::core_modules::clock::{Clock, SystemClock};
use crate::core_modules::landmark::LandmarkSet;
use crate::pipeline::{FramePipeline, FrameReport};
use futures::future::join_all;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PipelineError {
    #[error("frame worker pool is not accepting work")]
    WorkerUnavailable,
}

pub struct FrameTask {
    pub user_id: String,
    pub landmarks: Option<LandmarkSet>,
    pub result_sender: oneshot::Sender<FrameReport>,
}

/// Processes frames for many users at once. Every user is pinned to one
/// worker, so a user's frames are handled in the order they were submitted.
pub struct WorkerPool<C: Clock + 'static = SystemClock> {
    pipeline: Arc<FramePipeline<C>>,
    worker_senders: Vec<mpsc::UnboundedSender<FrameTask>>,
    workers: Vec<tokio::task::JoinHandle<()>>,
}

impl<C: Clock + 'static> WorkerPool<C> {
    /// Spawns `worker_count` workers (at least one) on the current tokio runtime.
    pub fn new(pipeline: Arc<FramePipeline<C>>, worker_count: usize) -> Self {
        let worker_count = worker_count.max(1);
        let mut worker_senders = Vec::with_capacity(worker_count);
        let mut workers = Vec::with_capacity(worker_count);

        for worker_idx in 0..worker_count {
            let (tx, mut rx) = mpsc::unbounded_channel::<FrameTask>();
            let worker_pipeline = Arc::clone(&pipeline);

            let worker = tokio::spawn(async move {
                while let Some(task) = rx.recv().await {
                    let report = worker_pipeline.process_frame(&task.user_id, task.landmarks.as_ref());
                    // The caller may have given up waiting; nothing to do then.
                    let _ = task.result_sender.send(report);
                }
                tracing::debug!(worker_idx, "frame worker exiting");
            });

            worker_senders.push(tx);
            workers.push(worker);
        }

        Self {
            pipeline,
            worker_senders,
            workers,
        }
    }

    /// One worker per available CPU.
    pub fn with_default_workers(pipeline: Arc<FramePipeline<C>>) -> Self {
        Self::new(pipeline, num_cpus::get())
    }

    pub fn pipeline(&self) -> &Arc<FramePipeline<C>> {
        &self.pipeline
    }

    pub fn worker_count(&self) -> usize {
        self.worker_senders.len()
    }

    fn worker_for(&self, user_id: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        user_id.hash(&mut hasher);
        (hasher.finish() % self.worker_senders.len() as u64) as usize
    }

    pub async fn process_frame(
        &self,
        user_id: &str,
        landmarks: Option<LandmarkSet>,
    ) -> Result<FrameReport, PipelineError> {
        let (result_sender, result_receiver) = oneshot::channel();

        let task = FrameTask {
            user_id: user_id.to_string(),
            landmarks,
            result_sender,
        };

        self.worker_senders[self.worker_for(user_id)]
            .send(task)
            .map_err(|_| PipelineError::WorkerUnavailable)?;

        result_receiver
            .await
            .map_err(|_| PipelineError::WorkerUnavailable)
    }

    /// Submits a batch of frames and waits for all of them. Reports come back
    /// in input order.
    pub async fn process_batch(
        &self,
        frames: Vec<(String, Option<LandmarkSet>)>,
    ) -> Vec<Result<FrameReport, PipelineError>> {
        // Enqueue synchronously first so per-user order follows input order.
        let pending: Vec<_> = frames
            .into_iter()
            .map(|(user_id, landmarks)| {
                let (result_sender, result_receiver) = oneshot::channel();
                let worker = self.worker_for(&user_id);
                let sent = self.worker_senders[worker].send(FrameTask {
                    user_id,
                    landmarks,
                    result_sender,
                });
                async move {
                    sent.map_err(|_| PipelineError::WorkerUnavailable)?;
                    result_receiver
                        .await
                        .map_err(|_| PipelineError::WorkerUnavailable)
                }
            })
            .collect();

        join_all(pending).await
    }

    /// Closes the queues and waits for in-flight frames to finish.
    pub async fn shutdown(self) {
        drop(self.worker_senders);
        for worker in self.workers {
            if let Err(e) = worker.await {
                tracing::warn!(error = %e, "frame worker ended abnormally");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_modules::clock::ManualClock;
    use crate::core_modules::form_evaluator::fixtures::Pose;
    use crate::pipeline::PipelineConfig;

    fn pool(workers: usize) -> WorkerPool<Arc<ManualClock>> {
        let pipeline = FramePipeline::with_clock(
            PipelineConfig::default().exercise(),
            Arc::new(ManualClock::new()),
        );
        WorkerPool::new(Arc::new(pipeline), workers)
    }

    #[tokio::test]
    async fn batch_keeps_per_user_order() {
        let pool = pool(4);
        let users = ["ann", "ben", "cat", "dan", "eve"];
        for user in users {
            pool.pipeline().start(user);
        }

        let mut frames = Vec::new();
        for _ in 0..3 {
            for user in users {
                frames.push((user.to_string(), Some(Pose::good(170.0).landmarks())));
                frames.push((user.to_string(), Some(Pose::good(120.0).landmarks())));
            }
        }

        let reports = pool.process_batch(frames).await;
        assert_eq!(reports.len(), 30);
        for user in users {
            let counts: Vec<u32> = reports
                .iter()
                .map(|r| r.as_ref().expect("worker alive"))
                .filter(|r| r.user_id == user)
                .map(|r| r.repetition_count)
                .collect();
            assert_eq!(counts, vec![0, 1, 1, 2, 2, 3]);
        }
    }

    #[tokio::test]
    async fn single_frame_round_trip() {
        let pool = pool(2);
        pool.pipeline().start("solo");
        let report = pool
            .process_frame("solo", Some(Pose::good(130.0).landmarks()))
            .await
            .expect("worker alive");
        assert_eq!(report.repetition_count, 1);
        assert_eq!(pool.worker_count(), 2);
    }

    #[tokio::test]
    async fn zero_workers_still_gets_one() {
        let pool = pool(0);
        assert_eq!(pool.worker_count(), 1);
        let report = pool.process_frame("x", None).await.expect("worker alive");
        assert!(report.form.is_none());
        pool.shutdown().await;
    }
}
