//! Task discovery, FIFO queueing and the bounded worker pool.
//!
//! The scheduler owns the document and every task's element; workers only
//! ever see [`TaskJob`]s. Completions come back over a channel and are applied
//! to the document here, which keeps `active_count` single-writer.

use futures_util::FutureExt;
use kuchiki::NodeRef;
use serde::Serialize;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{PipelineError, Step, StepError, TransportError};
use crate::fetch::FetchTier;
use crate::ocr::{DisplaySize, FilterStats, Overlay};
use crate::page::{self, DEFAULT_MIN_IMAGE_SIDE, Page};
use crate::pipeline::{Pipeline, PipelineOutput, TaskJob, TaskOutcome};
use crate::transport::RetryPolicy;

mod report;

pub use report::{ScanReport, TaskReport, Transition};

pub const DEFAULT_MAX_CONCURRENT: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Queued,
    Processing,
    Done,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Done => "done",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Failed)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    pub max_concurrent: usize,
    pub min_image_side: f32,
    pub dispatch: RetryPolicy,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            min_image_side: DEFAULT_MIN_IMAGE_SIDE,
            dispatch: RetryPolicy::default(),
        }
    }
}

/// One candidate image and its progress through the pipeline.
#[derive(Debug)]
pub struct ImageTask {
    pub id: usize,
    pub url: String,
    pub page_url: Option<String>,
    pub source_lang: String,
    pub target_lang: String,
    pub display: DisplaySize,
    status: TaskStatus,
    element: NodeRef,
    tier: Option<FetchTier>,
    filtered: Option<FilterStats>,
    blocks: usize,
    no_text: bool,
    error: Option<String>,
}

impl ImageTask {
    pub fn status(&self) -> TaskStatus {
        self.status
    }

    fn job(&self) -> TaskJob {
        TaskJob {
            id: self.id,
            url: self.url.clone(),
            page_url: self.page_url.clone(),
            source_lang: self.source_lang.clone(),
            target_lang: self.target_lang.clone(),
            display: self.display,
        }
    }

    fn report(&self) -> TaskReport {
        TaskReport {
            id: self.id,
            url: self.url.clone(),
            status: self.status,
            tier: self.tier,
            blocks: self.blocks,
            no_text: self.no_text,
            filtered: self.filtered,
            error: self.error.clone(),
        }
    }
}

pub struct Scheduler {
    options: SchedulerOptions,
    pipeline: Arc<Pipeline>,
    tasks: Vec<ImageTask>,
    queue: VecDeque<usize>,
    active_count: usize,
    next_id: usize,
    transitions: Vec<Transition>,
}

impl Scheduler {
    pub fn new(pipeline: Arc<Pipeline>, options: SchedulerOptions) -> Self {
        Self {
            options,
            pipeline,
            tasks: Vec::new(),
            queue: VecDeque::new(),
            active_count: 0,
            next_id: 0,
            transitions: Vec::new(),
        }
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Pending tasks for every untouched candidate on `page`.
    pub fn discover(&mut self, page: &Page, source_lang: &str, target_lang: &str) -> Vec<ImageTask> {
        let tasks = page
            .candidates(self.options.min_image_side)
            .into_iter()
            .map(|candidate| {
                let id = self.next_id;
                self.next_id += 1;
                ImageTask {
                    id,
                    url: candidate.url,
                    page_url: page.url().map(str::to_string),
                    source_lang: source_lang.to_string(),
                    target_lang: target_lang.to_string(),
                    display: candidate.display,
                    status: TaskStatus::Pending,
                    element: candidate.element,
                    tier: None,
                    filtered: None,
                    blocks: 0,
                    no_text: false,
                    error: None,
                }
            })
            .collect::<Vec<_>>();
        debug!("discovered {} candidate image(s)", tasks.len());
        tasks
    }

    /// Queues `task` and shows its indicator. Returns false when the element
    /// already carries a status marker.
    pub fn enqueue(&mut self, mut task: ImageTask) -> bool {
        if let Some(existing) = page::status(&task.element) {
            debug!("not enqueuing {}: already {}", task.url, existing);
            return false;
        }
        if let Err(err) = page::mark_queued(&task.element) {
            warn!("cannot queue {}: {}", task.url, err);
            return false;
        }
        task.status = TaskStatus::Queued;
        self.record(task.id, TaskStatus::Queued);
        self.queue.push_back(task.id);
        self.tasks.push(task);
        true
    }

    /// Discovers and enqueues in one step, returning how many were queued.
    pub fn scan(&mut self, page: &Page, source_lang: &str, target_lang: &str) -> usize {
        self.discover(page, source_lang, target_lang)
            .into_iter()
            .map(|task| self.enqueue(task))
            .filter(|queued| *queued)
            .count()
    }

    /// Drives every queued task to a terminal state and reports on them.
    pub async fn run_loop(&mut self) -> ScanReport {
        let workers = self.options.max_concurrent.max(1);
        let (job_tx, job_rx) = mpsc::channel::<TaskJob>(workers);
        let (done_tx, mut done_rx) = mpsc::channel::<TaskOutcome>(workers);
        let pool = spawn_workers(workers, Arc::clone(&self.pipeline), job_rx, done_tx);
        info!(
            "processing {} queued image(s) with {} worker(s)",
            self.queue.len(),
            workers
        );

        self.pump(&job_tx).await;
        while self.active_count > 0 {
            let Some(outcome) = done_rx.recv().await else {
                warn!(
                    "worker pool stopped with {} task(s) in flight",
                    self.active_count
                );
                self.abandon_in_flight();
                break;
            };
            self.active_count -= 1;
            self.complete(outcome);
            self.pump(&job_tx).await;
        }

        drop(job_tx);
        for worker in pool {
            if let Err(err) = worker.await {
                warn!("worker exited abnormally: {}", err);
            }
        }
        self.take_report()
    }

    /// Dispatches queued tasks until the pool is full. The job channel holds
    /// one slot per worker and at most `limit` jobs are outstanding, so
    /// `try_send` only fails once every worker has gone away.
    async fn pump(&mut self, jobs: &mpsc::Sender<TaskJob>) {
        let limit = self.options.max_concurrent.max(1);
        let policy = self.options.dispatch;
        while self.active_count < limit {
            let Some(id) = self.queue.pop_front() else {
                break;
            };
            let Some(job) = self.task(id).map(ImageTask::job) else {
                continue;
            };
            let delivered = policy
                .run("dispatch", |_| {
                    let job = job.clone();
                    async move { jobs.try_send(job).map_err(|err| err.to_string()) }
                })
                .await;
            match delivered {
                Ok(()) => {
                    self.active_count += 1;
                    if let Some(task) = self.task_mut(id) {
                        task.status = TaskStatus::Processing;
                        page::mark_processing(&task.element);
                    }
                    self.record(id, TaskStatus::Processing);
                    info!("task {} processing {}", id, job.url);
                }
                Err(err) => self.fail(id, StepError::new(Step::Dispatch, err)),
            }
        }
    }

    fn complete(&mut self, outcome: TaskOutcome) {
        let TaskOutcome {
            id,
            tier,
            stats,
            result,
        } = outcome;
        let renderer = Arc::clone(&self.pipeline);
        let style = renderer.renderer().style();
        let Some(task) = self.task_mut(id) else {
            warn!("completion for unknown task {}", id);
            return;
        };
        task.tier = tier;
        task.filtered = stats;

        let attached = match result {
            Ok(PipelineOutput::NoText) => {
                page::mark_no_text(&task.element);
                task.no_text = true;
                Ok(())
            }
            Ok(PipelineOutput::Rendered { overlay, blocks }) => {
                task.blocks = blocks;
                match &overlay {
                    Overlay::Layer(layer) => page::attach_layer(&task.element, layer, style)
                        .map_err(|err| StepError::new(Step::Render, err)),
                    Overlay::Raster(raster) => {
                        page::attach_raster(&task.element, raster, style);
                        Ok(())
                    }
                }
            }
            Err(err) => Err(err),
        };

        match attached {
            Ok(()) => {
                task.status = TaskStatus::Done;
                info!("task {} done ({})", id, task.url);
                self.record(id, TaskStatus::Done);
            }
            Err(err) => self.fail(id, err),
        }
    }

    /// Unwinds the element so a later scan can pick it up again.
    fn fail(&mut self, id: usize, err: StepError) {
        if let Some(task) = self.task_mut(id) {
            warn!("task {} failed for {}: {}", id, task.url, err);
            page::unwind(&task.element);
            task.status = TaskStatus::Failed;
            task.error = Some(err.to_string());
        }
        self.record(id, TaskStatus::Failed);
    }

    fn abandon_in_flight(&mut self) {
        let stuck = self
            .tasks
            .iter()
            .filter(|task| task.status == TaskStatus::Processing)
            .map(|task| task.id)
            .collect::<Vec<_>>();
        for id in stuck {
            let err = TransportError {
                label: "completion".to_string(),
                attempts: 1,
                last: "worker stopped before reporting".to_string(),
            };
            self.fail(id, StepError::new(Step::Dispatch, err));
        }
        self.active_count = 0;
    }

    /// Terminal tasks leave the scheduler with the report.
    fn take_report(&mut self) -> ScanReport {
        let (finished, remaining): (Vec<_>, Vec<_>) = std::mem::take(&mut self.tasks)
            .into_iter()
            .partition(|task| task.status.is_terminal());
        self.tasks = remaining;
        ScanReport {
            tasks: finished.iter().map(ImageTask::report).collect(),
            transitions: std::mem::take(&mut self.transitions),
        }
    }

    fn record(&mut self, task: usize, status: TaskStatus) {
        self.transitions.push(Transition { task, status });
    }

    fn task(&self, id: usize) -> Option<&ImageTask> {
        self.tasks.iter().find(|task| task.id == id)
    }

    fn task_mut(&mut self, id: usize) -> Option<&mut ImageTask> {
        self.tasks.iter_mut().find(|task| task.id == id)
    }
}

fn spawn_workers(
    count: usize,
    pipeline: Arc<Pipeline>,
    jobs: mpsc::Receiver<TaskJob>,
    done: mpsc::Sender<TaskOutcome>,
) -> Vec<JoinHandle<()>> {
    let jobs = Arc::new(Mutex::new(jobs));
    (0..count)
        .map(|worker| {
            let jobs = Arc::clone(&jobs);
            let pipeline = Arc::clone(&pipeline);
            let done = done.clone();
            tokio::spawn(async move {
                loop {
                    let job = jobs.lock().await.recv().await;
                    let Some(job) = job else {
                        break;
                    };
                    debug!("worker {} picked task {}", worker, job.id);
                    let id = job.id;
                    let outcome = AssertUnwindSafe(pipeline.run(job))
                        .catch_unwind()
                        .await
                        .unwrap_or_else(|panic| panicked(id, panic.as_ref()));
                    if done.send(outcome).await.is_err() {
                        break;
                    }
                }
            })
        })
        .collect()
}

/// A task that panicked still reports back, so the loop's in-flight count
/// stays exact.
fn panicked(id: usize, panic: &(dyn Any + Send)) -> TaskOutcome {
    let message = panic
        .downcast_ref::<&str>()
        .map(|text| text.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string());
    TaskOutcome {
        id,
        tier: None,
        stats: None,
        result: Err(StepError::new(Step::Worker, PipelineError::Panicked(message))),
    }
}
