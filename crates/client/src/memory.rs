//! In-process [`RemoteService`] with scripted behaviour.
//!
//! Used by the test suites and by the CLI's `--offline` mode. Every
//! submitted job follows the same status script; once the script is down
//! to its last entry that entry repeats forever. Unless a fixed result is
//! configured, a job's payload is the placeholder BMP for its requested
//! geometry, the same kind of bytes the real service hands back.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use sdgen_core::job::{JobHandle, JobRequest};
use sdgen_core::raster;

use crate::service::{RemoteService, RemoteStatus, ServiceError};

type ScriptStep = Result<RemoteStatus, ServiceError>;

struct Task {
    request: JobRequest,
    script: VecDeque<ScriptStep>,
}

#[derive(Default)]
struct Counters {
    submit: usize,
    status: usize,
    result: usize,
}

struct Inner {
    next_id: u64,
    tasks: BTreeMap<String, Task>,
    counters: Counters,
}

/// Scripted, thread-safe stand-in for the generation service.
pub struct InMemoryService {
    script: Vec<ScriptStep>,
    submit_failure: Option<ServiceError>,
    result: Option<Result<Vec<u8>, ServiceError>>,
    inner: Mutex<Inner>,
}

impl Default for InMemoryService {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryService {
    /// A service whose jobs are `Completed` on the first status check.
    pub fn new() -> Self {
        Self {
            script: vec![Ok(RemoteStatus::Completed)],
            submit_failure: None,
            result: None,
            inner: Mutex::new(Inner {
                next_id: 0,
                tasks: BTreeMap::new(),
                counters: Counters::default(),
            }),
        }
    }

    /// Replace the per-job status script. An empty script keeps the default.
    pub fn with_status_script(mut self, steps: impl IntoIterator<Item = ScriptStep>) -> Self {
        let steps: Vec<_> = steps.into_iter().collect();
        if !steps.is_empty() {
            self.script = steps;
        }
        self
    }

    /// Every submission fails with `error`.
    pub fn with_submit_failure(mut self, error: ServiceError) -> Self {
        self.submit_failure = Some(error);
        self
    }

    /// Every completed job returns exactly `bytes`.
    pub fn with_result(mut self, bytes: Vec<u8>) -> Self {
        self.result = Some(Ok(bytes));
        self
    }

    /// Every result download fails with `error`.
    pub fn with_result_failure(mut self, error: ServiceError) -> Self {
        self.result = Some(Err(error));
        self
    }

    pub fn submit_calls(&self) -> usize {
        self.lock().counters.submit
    }

    pub fn status_calls(&self) -> usize {
        self.lock().counters.status
    }

    pub fn result_calls(&self) -> usize {
        self.lock().counters.result
    }

    /// IDs of every job submitted so far, sorted.
    pub fn task_ids(&self) -> Vec<String> {
        self.lock().tasks.keys().cloned().collect()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl RemoteService for InMemoryService {
    async fn submit_job(&self, request: &JobRequest) -> Result<JobHandle, ServiceError> {
        let mut inner = self.lock();
        inner.counters.submit += 1;

        if let Some(err) = &self.submit_failure {
            return Err(err.clone());
        }

        inner.next_id += 1;
        let id = format!("task_{}", inner.next_id);
        inner.tasks.insert(
            id.clone(),
            Task {
                request: request.clone(),
                script: self.script.iter().cloned().collect(),
            },
        );

        tracing::debug!(task_id = %id, "In-memory job queued");
        Ok(JobHandle::new(id))
    }

    async fn get_status(&self, handle: &JobHandle) -> Result<RemoteStatus, ServiceError> {
        let mut inner = self.lock();
        inner.counters.status += 1;

        let task = inner
            .tasks
            .get_mut(handle.as_str())
            .ok_or(ServiceError::NotFound)?;

        let step = if task.script.len() > 1 {
            task.script.pop_front()
        } else {
            task.script.front().cloned()
        };
        let status = step.unwrap_or(Ok(RemoteStatus::Completed))?;

        // A job whose placeholder cannot be rendered fails, as a real
        // generation error would.
        if status == RemoteStatus::Completed && self.result.is_none() {
            let (width, height) = (task.request.width(), task.request.height());
            if let Err(e) = raster::validate_geometry(width, height) {
                return Ok(RemoteStatus::Failed(Some(e.to_string())));
            }
        }
        Ok(status)
    }

    async fn get_result(&self, handle: &JobHandle) -> Result<Vec<u8>, ServiceError> {
        let mut inner = self.lock();
        inner.counters.result += 1;

        let task = inner
            .tasks
            .get(handle.as_str())
            .ok_or(ServiceError::NotFound)?;

        match &self.result {
            Some(result) => result.clone(),
            None => raster::encode(task.request.width(), task.request.height(), None)
                .map_err(|e| ServiceError::Rejected {
                    status: 500,
                    message: e.to_string(),
                }),
        }
    }
}
