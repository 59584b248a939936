//! Affinity executors: named, single-threaded task queues with a hard
//! "currently on my own thread" identity check, used to serialize backend
//! state mutation the way the teacher's `BitcoindClient` pins its RPC calls
//! to one `tokio::runtime::Handle` (spec §5).

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::thread::ThreadId;

use tokio::sync::{mpsc, oneshot};

type BoxedTask = Pin<Box<dyn Future<Output = ()> + Send>>;

/// A single-threaded task queue identified by name. `execute` runs a
/// closure inline if the caller is already on the executor's thread, or
/// enqueues it for the worker thread otherwise — mirroring the "run
/// on-thread or dispatch" pattern every affinity-based API in this backend
/// uses to avoid deadlocking on itself.
pub struct AffinityExecutor {
    name: &'static str,
    thread_id: ThreadId,
    sender: Option<mpsc::UnboundedSender<BoxedTask>>,
    _runtime: Option<tokio::runtime::Runtime>,
}

impl fmt::Debug for AffinityExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AffinityExecutor").field("name", &self.name).finish()
    }
}

impl AffinityExecutor {
    /// Spin up a dedicated worker thread with its own current-thread Tokio
    /// runtime and start draining submitted tasks on it.
    pub fn spawn(name: &'static str) -> std::io::Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .thread_name(name)
            .build()?;

        let (tx, mut rx) = mpsc::unbounded_channel::<BoxedTask>();
        let (thread_id_tx, thread_id_rx) = std::sync::mpsc::channel();

        let handle = runtime.handle().clone();
        std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _ = thread_id_tx.send(std::thread::current().id());
                handle.block_on(async move {
                    while let Some(task) = rx.recv().await {
                        task.await;
                    }
                });
            })?;

        let thread_id = thread_id_rx
            .recv()
            .expect("affinity executor worker thread failed to report its id");

        Ok(AffinityExecutor { name, thread_id, sender: Some(tx), _runtime: Some(runtime) })
    }

    /// A `SAME_THREAD` variant for tests: no dedicated worker thread is
    /// spawned, `is_on_thread` is always true for the calling thread, and
    /// `execute`/`spawn_detached` run inline instead of crossing a channel.
    /// Must be called from within a Tokio runtime (e.g. `#[tokio::test]`),
    /// since `spawn_detached` dispatches via `tokio::spawn`.
    pub fn same_thread(name: &'static str) -> Self {
        AffinityExecutor { name, thread_id: std::thread::current().id(), sender: None, _runtime: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// `true` iff the calling thread is this executor's own worker thread.
    pub fn is_on_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    /// Panics if the calling thread is not this executor's own thread.
    /// Every method that assumes single-threaded access to backend state
    /// calls this first.
    pub fn assert_on_thread(&self) {
        assert!(
            self.is_on_thread(),
            "called off the {} affinity executor's thread",
            self.name
        );
    }

    /// Submit `fut` to run on this executor's thread without waiting for
    /// it to finish — used for long-running loops (e.g. an observable
    /// mirror) that outlive the caller's own call.
    pub fn spawn_detached<F>(&self, fut: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        match &self.sender {
            Some(sender) => {
                let boxed: BoxedTask = Box::pin(fut);
                let _ = sender.send(boxed);
            }
            None => {
                tokio::spawn(fut);
            }
        }
    }

    /// Run `fut` to completion, returning its result. If already on this
    /// executor's thread, run it in place (this is what lets a handler
    /// already executing on the backend thread call another backend method
    /// without deadlocking on itself). Otherwise dispatch it to the worker
    /// thread and await the result.
    pub async fn execute<F, T>(&self, fut: F) -> T
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_on_thread() {
            return fut.await;
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: BoxedTask = Box::pin(async move {
            let result = fut.await;
            let _ = reply_tx.send(result);
        });
        // The executor only shuts down with the process; a closed receiver
        // here would mean the worker thread panicked. `same_thread`
        // executors never reach this branch since `is_on_thread` is always
        // true for them.
        self.sender.as_ref().expect("same_thread executor dispatched off-thread").send(boxed).expect("affinity executor thread gone");
        reply_rx.await.expect("affinity executor dropped the task before finishing it")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn execute_dispatches_off_thread_work() {
        let executor = AffinityExecutor::spawn("test-executor").unwrap();
        assert!(!executor.is_on_thread());
        let result = executor.execute(async { 2 + 2 }).await;
        assert_eq!(result, 4);
    }

    #[tokio::test]
    async fn same_thread_executor_runs_inline() {
        let executor = AffinityExecutor::same_thread("same-thread-test");
        assert!(executor.is_on_thread());
        let result = executor.execute(async { 2 + 2 }).await;
        assert_eq!(result, 4);
    }
}
