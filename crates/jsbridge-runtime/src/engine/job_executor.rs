//! Job executor for Boa's promise job queue.
//!
//! Promise reactions, async native jobs and generic jobs are queued here and
//! drained by the worker after every unit of work. Async jobs (such as promises
//! backed by a native `Deferred`) are driven to completion with
//! `futures_lite::future::block_on`; while only they remain, the worker parks
//! until one of them wakes it.
//!
//! Jobs that fail are not logged and forgotten: their errors are collected
//! and handed to the session's unhandled-error handler by the engine.

use boa_engine::{
    JsError, JsResult,
    context::Context,
    job::{GenericJob, Job, JobExecutor, NativeAsyncJob, PromiseJob},
};
use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

#[derive(Default)]
pub(crate) struct BridgeJobExecutor {
    promise_jobs: RefCell<VecDeque<PromiseJob>>,
    async_jobs: RefCell<VecDeque<NativeAsyncJob>>,
    generic_jobs: RefCell<VecDeque<GenericJob>>,
    errors: RefCell<Vec<JsError>>,
}

impl BridgeJobExecutor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn has_pending_jobs(&self) -> bool {
        !self.promise_jobs.borrow().is_empty()
            || !self.async_jobs.borrow().is_empty()
            || !self.generic_jobs.borrow().is_empty()
    }

    /// Errors raised by jobs since the last call.
    pub(crate) fn take_errors(&self) -> Vec<JsError> {
        std::mem::take(&mut *self.errors.borrow_mut())
    }

    fn record(&self, kind: &str, err: JsError) {
        tracing::debug!("Uncaught error in {kind} job: {err}");
        self.errors.borrow_mut().push(err);
    }

    /// Runs one generic job, then every queued promise job.
    fn drain_jobs(&self, context: &mut Context) {
        let generic = self.generic_jobs.borrow_mut().pop_front();
        if let Some(generic) = generic {
            if let Err(err) = generic.call(context) {
                self.record("generic", err);
            }
        }

        let jobs = std::mem::take(&mut *self.promise_jobs.borrow_mut());
        for job in jobs {
            if let Err(err) = job.call(context) {
                self.record("promise", err);
            }
        }

        context.clear_kept_objects();
    }
}

impl JobExecutor for BridgeJobExecutor {
    fn enqueue_job(self: Rc<Self>, job: Job, _context: &mut Context) {
        match job {
            Job::PromiseJob(job) => self.promise_jobs.borrow_mut().push_back(job),
            Job::AsyncJob(job) => self.async_jobs.borrow_mut().push_back(job),
            Job::GenericJob(job) => self.generic_jobs.borrow_mut().push_back(job),
            _ => tracing::warn!("Unsupported job type enqueued, ignoring"),
        }
    }

    fn run_jobs(self: Rc<Self>, context: &mut Context) -> JsResult<()> {
        futures_lite::future::block_on(self.run_jobs_async(&RefCell::new(context)))
    }

    async fn run_jobs_async(self: Rc<Self>, context: &RefCell<&mut Context>) -> JsResult<()>
    where
        Self: Sized,
    {
        use futures_concurrency::future::FutureGroup;
        use futures_lite::{StreamExt, future};

        let mut group = FutureGroup::new();

        loop {
            for job in std::mem::take(&mut *self.async_jobs.borrow_mut()) {
                group.insert(job.call(context));
            }

            if group.is_empty()
                && self.promise_jobs.borrow().is_empty()
                && self.generic_jobs.borrow().is_empty()
            {
                return Ok(());
            }

            let idle = self.promise_jobs.borrow().is_empty() && self.generic_jobs.borrow().is_empty();
            let finished = if idle {
                group.next().await
            } else {
                future::poll_once(group.next()).await.flatten()
            };
            if let Some(Err(err)) = finished {
                self.record("async", err);
            }

            self.drain_jobs(&mut context.borrow_mut());
            future::yield_now().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boa_engine::{JsNativeError, JsValue, Source};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn context_with(executor: &Rc<BridgeJobExecutor>) -> Context {
        Context::builder()
            .job_executor(executor.clone())
            .build()
            .unwrap()
    }

    #[test]
    fn test_new_executor_is_empty() {
        let executor = BridgeJobExecutor::new();
        assert!(!executor.has_pending_jobs());
        assert!(executor.take_errors().is_empty());
    }

    #[test]
    fn test_generic_jobs_run() {
        let executor = Rc::new(BridgeJobExecutor::new());
        let mut context = context_with(&executor);
        let counter = Arc::new(AtomicUsize::new(0));

        for _ in 0..3 {
            let counter_clone = Arc::clone(&counter);
            let realm = context.realm().clone();
            let job = Job::GenericJob(GenericJob::new(
                move |_| {
                    counter_clone.fetch_add(1, Ordering::SeqCst);
                    Ok(JsValue::undefined())
                },
                realm,
            ));
            executor.clone().enqueue_job(job, &mut context);
        }
        assert!(executor.has_pending_jobs());

        context.run_jobs().unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert!(!executor.has_pending_jobs());
    }

    #[test]
    fn test_failed_jobs_are_collected() {
        let executor = Rc::new(BridgeJobExecutor::new());
        let mut context = context_with(&executor);

        let realm = context.realm().clone();
        let job = Job::GenericJob(GenericJob::new(
            |_| Err(JsNativeError::typ().with_message("job failed").into()),
            realm,
        ));
        executor.clone().enqueue_job(job, &mut context);

        context.run_jobs().unwrap();
        let errors = executor.take_errors();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].to_string().contains("job failed"));
        assert!(executor.take_errors().is_empty());
    }

    #[test]
    fn test_async_jobs_complete_from_other_threads() {
        let executor = Rc::new(BridgeJobExecutor::new());
        let mut context = context_with(&executor);
        let (tx, rx) = tokio::sync::oneshot::channel::<i32>();

        let job = NativeAsyncJob::new(async move |context| {
            let value = rx.await.unwrap_or(-1);
            let mut guard = context.borrow_mut();
            let ctx: &mut Context = &mut guard;
            ctx.global_object()
                .set(boa_engine::js_string!("late"), value, true, ctx)?;
            Ok(JsValue::undefined())
        });
        executor.clone().enqueue_job(Job::AsyncJob(job), &mut context);

        let sender = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(20));
            let _ = tx.send(7);
        });
        context.run_jobs().unwrap();
        sender.join().unwrap();

        let late = context.eval(Source::from_bytes("late")).unwrap();
        assert_eq!(late.as_i32(), Some(7));
    }

    #[test]
    fn test_promise_reactions_drain() {
        let executor = Rc::new(BridgeJobExecutor::new());
        let mut context = context_with(&executor);

        context
            .eval(Source::from_bytes(
                "globalThis.seen = 0; Promise.resolve(41).then(v => { globalThis.seen = v + 1; });",
            ))
            .unwrap();
        assert!(executor.has_pending_jobs());

        context.run_jobs().unwrap();
        let seen = context.eval(Source::from_bytes("seen")).unwrap();
        assert_eq!(seen.as_i32(), Some(42));
    }
}
