//! Timer API
//!
//! Installs `setTimeout`, `setInterval`, `clearTimeout` and `clearInterval`.
//! The engine only records timers; the worker fires them between units of
//! work, in deadline order. Delays that are NaN or outside `1..=2^31-1` ms
//! count as zero, and intervals repeat at least 1 ms apart.

use boa_engine::{
    Context, JsNativeError, JsObject, JsResult, JsString, JsValue, native_function::NativeFunction,
    object::FunctionObjectBuilder,
};
use boa_gc::{Finalize, Trace};
use jsbridge_common::{BridgeError, Result};
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use std::time::{Duration, Instant};

const MAX_DELAY_MS: f64 = 2_147_483_647.0;
const MIN_INTERVAL: Duration = Duration::from_millis(1);

struct Timer {
    callback: JsObject,
    args: Vec<JsValue>,
    interval: Option<Duration>,
}

/// A callback that is due, with its arguments.
pub(crate) struct DueTimer {
    pub(crate) id: u32,
    pub(crate) callback: JsObject,
    pub(crate) args: Vec<JsValue>,
}

/// Timers of one engine. Lives on the worker thread only.
#[derive(Default)]
pub(crate) struct Timers {
    next_id: Cell<u32>,
    next_seq: Cell<u64>,
    /// Deadline, then scheduling order
    queue: RefCell<BTreeMap<(Instant, u64), u32>>,
    active: RefCell<HashMap<u32, Timer>>,
}

impl Timers {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn schedule(&self, callback: JsObject, args: Vec<JsValue>, delay: Duration, repeat: bool) -> u32 {
        let id = self.next_id.get().wrapping_add(1).max(1);
        self.next_id.set(id);

        let interval = repeat.then(|| delay.max(MIN_INTERVAL));
        self.active.borrow_mut().insert(
            id,
            Timer {
                callback,
                args,
                interval,
            },
        );
        self.enqueue(id, Instant::now() + delay);
        tracing::trace!(timer = id, ?delay, repeat, "Scheduled timer");
        id
    }

    fn enqueue(&self, id: u32, deadline: Instant) {
        let seq = self.next_seq.get();
        self.next_seq.set(seq + 1);
        self.queue.borrow_mut().insert((deadline, seq), id);
    }

    fn cancel(&self, id: u32) {
        if self.active.borrow_mut().remove(&id).is_some() {
            tracing::trace!(timer = id, "Cleared timer");
        }
    }

    /// Drops every timer.
    pub(crate) fn clear(&self) {
        self.queue.borrow_mut().clear();
        self.active.borrow_mut().clear();
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.active.borrow().is_empty()
    }

    /// Deadline of the earliest live timer.
    pub(crate) fn next_deadline(&self) -> Option<Instant> {
        let active = self.active.borrow();
        let mut queue = self.queue.borrow_mut();
        while let Some((&(deadline, seq), &id)) = queue.first_key_value() {
            if active.contains_key(&id) {
                return Some(deadline);
            }
            queue.remove(&(deadline, seq));
        }
        None
    }

    /// Scheduling position that [`pop_due`](Self::pop_due) stops at, so
    /// timers added while firing wait for the next round.
    pub(crate) fn cutoff(&self) -> u64 {
        self.next_seq.get()
    }

    /// Takes the next timer due at `now`. Intervals are rescheduled; one-shot
    /// timers are forgotten.
    pub(crate) fn pop_due(&self, now: Instant, cutoff: u64) -> Option<DueTimer> {
        loop {
            let (key, id) = {
                let queue = self.queue.borrow();
                let (&key, &id) = queue.first_key_value()?;
                (key, id)
            };
            if key.0 > now || key.1 >= cutoff {
                return None;
            }
            self.queue.borrow_mut().remove(&key);

            let mut active = self.active.borrow_mut();
            let Some(timer) = active.get(&id) else {
                continue;
            };
            let due = DueTimer {
                id,
                callback: timer.callback.clone(),
                args: timer.args.clone(),
            };
            let interval = timer.interval;
            match interval {
                Some(interval) => {
                    drop(active);
                    self.enqueue(id, now + interval);
                }
                None => {
                    active.remove(&id);
                }
            }
            return Some(due);
        }
    }
}

/// What the timer functions close over.
#[derive(Trace, Finalize)]
struct TimerApi {
    #[unsafe_ignore_trace]
    timers: Rc<Timers>,
    repeat: bool,
}

type TimerFn = fn(&JsValue, &[JsValue], &TimerApi, &mut Context) -> JsResult<JsValue>;

/// Installs the timer functions into the global object.
pub(crate) fn install_timers(ctx: &mut Context, timers: &Rc<Timers>) -> Result<()> {
    let functions: [(&str, usize, TimerFn, bool); 4] = [
        ("setTimeout", 2, set_timer, false),
        ("setInterval", 2, set_timer, true),
        ("clearTimeout", 1, clear_timer, false),
        ("clearInterval", 1, clear_timer, false),
    ];

    let realm = ctx.realm().clone();
    for (name, length, function, repeat) in functions {
        let api = TimerApi {
            timers: Rc::clone(timers),
            repeat,
        };
        let function = FunctionObjectBuilder::new(
            &realm,
            NativeFunction::from_copy_closure_with_captures(function, api),
        )
        .name(JsString::from(name))
        .length(length)
        .build();
        ctx.global_object()
            .set(JsString::from(name), function, false, ctx)
            .map_err(|e| BridgeError::Startup(format!("failed to install {name}: {e}")))?;
    }
    Ok(())
}

fn set_timer(_this: &JsValue, args: &[JsValue], api: &TimerApi, ctx: &mut Context) -> JsResult<JsValue> {
    let callback = args
        .first()
        .and_then(|value| value.as_object().map(|object| object.clone()))
        .filter(JsObject::is_callable)
        .ok_or_else(|| JsNativeError::typ().with_message("timer callback is not a function"))?;
    let delay = match args.get(1) {
        Some(delay) => delay.to_number(ctx)?,
        None => 0.0,
    };
    let extra = args.get(2..).unwrap_or_default().to_vec();

    let id = api.timers.schedule(callback, extra, normalize_delay(delay), api.repeat);
    Ok(JsValue::new(id))
}

fn clear_timer(_this: &JsValue, args: &[JsValue], api: &TimerApi, ctx: &mut Context) -> JsResult<JsValue> {
    if let Some(id) = args.first() {
        let id = id.to_number(ctx)?;
        if id.fract() == 0.0 && id >= 1.0 && id <= f64::from(u32::MAX) {
            api.timers.cancel(id as u32);
        }
    }
    Ok(JsValue::undefined())
}

fn normalize_delay(ms: f64) -> Duration {
    if (1.0..=MAX_DELAY_MS).contains(&ms) {
        Duration::from_millis(ms as u64)
    } else {
        Duration::ZERO
    }
}
