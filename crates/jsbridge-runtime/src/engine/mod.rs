//! The worker-owned engine.
//!
//! [`Engine`] wraps the Boa [`Context`] of a session. It is created on, and
//! never leaves, the worker thread.

pub(crate) mod console;
pub(crate) mod job_executor;
pub(crate) mod json;
pub(crate) mod marshal;
pub(crate) mod timers;

use crate::dispatcher::{lend_context, PendingCall, Reply};
use crate::session::SessionShared;
use boa_engine::{Context, JsValue};
use jsbridge_common::{BridgeError, Result};
use job_executor::BridgeJobExecutor;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Instant;
use timers::Timers;

pub(crate) struct Engine {
    ctx: Context,
    executor: Rc<BridgeJobExecutor>,
    timers: Rc<Timers>,
    shared: Arc<SessionShared>,
}

impl Engine {
    /// Builds a context with the session's limits, job executor, console and
    /// timers.
    pub(crate) fn new(shared: Arc<SessionShared>) -> Result<Self> {
        let executor = Rc::new(BridgeJobExecutor::new());
        let mut ctx = Context::builder()
            .job_executor(executor.clone())
            .build()
            .map_err(|e| BridgeError::Startup(format!("failed to build engine context: {e}")))?;

        let limits = &shared.config.limits;
        let mut runtime_limits = ctx.runtime_limits();
        runtime_limits.set_stack_size_limit(limits.stack_size_limit);
        runtime_limits.set_recursion_limit(limits.recursion_limit);
        runtime_limits.set_loop_iteration_limit(limits.loop_iteration_limit);
        ctx.set_runtime_limits(runtime_limits);

        console::install_console(&mut ctx, &shared.config.console)?;
        let timers = Rc::new(Timers::new());
        timers::install_timers(&mut ctx, &timers)?;

        Ok(Self {
            ctx,
            executor,
            timers,
            shared,
        })
    }

    /// Runs one unit of work, drains the job queue and delivers the result.
    pub(crate) fn execute(&mut self, call: PendingCall) {
        let PendingCall { label, work, reply } = call;
        tracing::debug!(session = self.shared.id, label, "Executing call");

        let result = work(&mut self.ctx, &self.shared);
        self.drain_jobs();

        match reply {
            Reply::Channel(tx) => {
                if tx.send(result).is_err() {
                    tracing::debug!(label, "Caller stopped waiting for result");
                }
            }
            Reply::Callback(callback) => {
                lend_context(self.shared.id, &mut self.ctx, || callback(result));
            }
            Reply::Detached => {
                if let Err(err) = result {
                    self.shared.config.report_unhandled(&err);
                }
            }
        }
    }

    /// When the earliest pending timer is due.
    pub(crate) fn next_timer(&self) -> Option<Instant> {
        self.timers.next_deadline()
    }

    /// Fires the timers that are due, draining the job queue after each.
    /// Failing callbacks go to the unhandled-error handler.
    pub(crate) fn run_timers(&mut self) {
        let now = Instant::now();
        let cutoff = self.timers.cutoff();
        while let Some(due) = self.timers.pop_due(now, cutoff) {
            tracing::trace!(session = self.shared.id, timer = due.id, "Firing timer");
            if let Err(err) = due.callback.call(&JsValue::undefined(), &due.args, &mut self.ctx) {
                let err = marshal::script_error(err, None, &mut self.ctx);
                self.shared.config.report_unhandled(&BridgeError::Script(err));
            }
            self.drain_jobs();
        }
    }

    fn drain_jobs(&mut self) {
        if self.executor.has_pending_jobs() {
            if let Err(err) = self.ctx.run_jobs() {
                let err = marshal::script_error(err, None, &mut self.ctx);
                self.shared.config.report_unhandled(&BridgeError::Script(err));
            }
        }

        for err in self.executor.take_errors() {
            let err = marshal::script_error(err, None, &mut self.ctx);
            self.shared.config.report_unhandled(&BridgeError::Script(err));
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.timers.clear();
    }
}
