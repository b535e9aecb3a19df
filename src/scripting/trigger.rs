/// `scripting/trigger.rs` - hardware events to Lua handler calls
///
/// The main loop drains `HardwareEvent`s from the drivers and hands each one
/// to `EventDispatcher::dispatch`, so handlers only ever run between other
/// evaluations. Indices are converted to the 1-based numbering scripts use.
use super::engine::{EvalOutcome, Evaluator, Handler};
use crate::hardware::HardwareEvent;

#[derive(Debug, Clone, Copy)]
pub struct EventDispatcher {
    /// Hardware timers in front of the first user metro. Their ticks are
    /// internal and never reach a script.
    metro_reserved: usize,
}

impl EventDispatcher {
    pub fn new(metro_reserved: usize) -> Self {
        Self { metro_reserved }
    }

    /// Fire-and-forget: a failing handler is reported by the evaluator and
    /// the outcome is returned for inspection only.
    pub fn dispatch(&self, engine: &Evaluator, event: HardwareEvent) -> EvalOutcome {
        match event {
            HardwareEvent::MotionComplete { channel } => {
                engine.invoke_handler(Handler::Toward, channel as i64 + 1)
            }
            HardwareEvent::MetroStage { timer, stage } => {
                if timer < self.metro_reserved {
                    log::trace!("[trigger] internal timer {timer} tick");
                    return EvalOutcome::Ok;
                }
                let id = (timer - self.metro_reserved) as i64 + 1;
                engine.invoke_handler(Handler::Metro, (id, stage as i64 + 1))
            }
            HardwareEvent::StreamSample { input, value } => {
                engine.invoke_handler(Handler::Stream, (input as i64 + 1, value as f64))
            }
        }
    }
}
