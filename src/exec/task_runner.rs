// src/exec/task_runner.rs

//! Supervised execution of a single dispatched task.

use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::errors::{TaskError, TimeoutError, panic_message};
use crate::exec::backend::{TaskFuture, TaskResult, WorkerBackend};
use crate::scheduler::{DispatchedTask, SchedulerEvent};
use crate::task::TaskId;

/// Start `task` on `backend` in its own tokio task and report exactly one
/// `WorkerFinished` event for it.
///
/// - A panic inside the task becomes a compute failure.
/// - If the task's timeout elapses, its future is aborted and a
///   [`TimeoutError`] is reported. Work already handed to a blocking thread
///   keeps running to completion, but its result is discarded.
/// - Sibling tasks are unaffected either way.
pub fn spawn_supervised<B: WorkerBackend + ?Sized>(
    backend: &B,
    task: DispatchedTask,
    events: mpsc::Sender<SchedulerEvent>,
) -> JoinHandle<()> {
    let id = task.id.clone();
    let label = task.label.clone();
    let timeout = task.timeout;
    let work = backend.execute(task);

    tokio::spawn(async move {
        let result = supervise(&id, &label, timeout, work).await;
        if events
            .send(SchedulerEvent::WorkerFinished {
                id: id.clone(),
                result,
            })
            .await
            .is_err()
        {
            debug!(task = %label, "scheduler gone; dropping task result");
        }
    })
}

async fn supervise(
    id: &TaskId,
    label: &str,
    timeout: Option<Duration>,
    work: TaskFuture,
) -> TaskResult {
    let mut handle = tokio::spawn(work);

    let joined = match timeout {
        None => (&mut handle).await,
        Some(limit) => match tokio::time::timeout(limit, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                handle.abort();
                warn!(task = %label, ?limit, "task exceeded its timeout; aborted");
                return Err(TimeoutError {
                    task: id.clone(),
                    limit,
                }
                .into());
            }
        },
    };

    match joined {
        Ok(result) => result,
        Err(e) if e.is_panic() => {
            let message = panic_message(e.into_panic());
            error!(task = %label, panic = %message, "task panicked");
            Err(TaskError::compute(
                id.clone(),
                anyhow!("task panicked: {}", message),
            ))
        }
        Err(e) => Err(TaskError::compute(id.clone(), e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use serde_json::json;

    use crate::task::{Params, Task};

    struct Scripted(fn() -> TaskFuture);

    impl WorkerBackend for Scripted {
        fn execute(&self, _task: DispatchedTask) -> TaskFuture {
            (self.0)()
        }
    }

    fn dispatched(timeout: Option<Duration>) -> DispatchedTask {
        let task = Task::new("t", Vec::new(), Params::new());
        DispatchedTask {
            id: task.id().clone(),
            label: "t".into(),
            task: Arc::new(task),
            inputs: Vec::new(),
            timeout,
            estimated_bytes: 0,
        }
    }

    fn boom() -> TaskResult {
        panic!("kaboom")
    }

    async fn finish(backend: Scripted, timeout: Option<Duration>) -> TaskResult {
        let (tx, mut rx) = mpsc::channel(1);
        spawn_supervised(&backend, dispatched(timeout), tx);
        match rx.recv().await {
            Some(SchedulerEvent::WorkerFinished { result, .. }) => result,
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn success_is_forwarded() {
        let result = finish(
            Scripted(|| -> TaskFuture { Box::pin(async { Ok(Arc::new(json!(7))) }) }),
            None,
        )
        .await;
        assert_eq!(*result.unwrap(), json!(7));
    }

    #[tokio::test]
    async fn panic_becomes_compute_error() {
        let result = finish(Scripted(|| -> TaskFuture { Box::pin(async { boom() }) }), None).await;
        let err = result.unwrap_err();
        assert!(!err.is_timeout());
        assert!(err.to_string().contains("kaboom"));
    }

    #[tokio::test]
    async fn slow_task_times_out() {
        let result = finish(
            Scripted(|| -> TaskFuture {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(Arc::new(json!(null)))
                })
            }),
            Some(Duration::from_millis(20)),
        )
        .await;
        assert!(result.unwrap_err().is_timeout());
    }
}
