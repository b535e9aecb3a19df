/// `scripting/` - the Lua engine behind the module
///
/// One VM (mlua) runs one user script at a time. Host input is evaluated
/// through `Evaluator`; hardware events reach script handlers through
/// `EventDispatcher`. Script errors are reported and never take the bridge
/// down.
pub mod api;
pub mod buffer;
pub mod engine;
pub mod libs;
pub mod sandbox;
pub mod trigger;

pub use buffer::{ScriptBuffer, ScriptBufferPool};
pub use engine::{
    EngineState, ErrorSink, EvalOutcome, Evaluator, Handler, StartupReport, StartupSource,
};
pub use trigger::EventDispatcher;
