/// `scripting/engine.rs` - Lua VM manager
///
/// `Evaluator` owns the one Lua state of the bridge. It is created by
/// `init`, dropped by `teardown`, and in between evaluates whole chunks and
/// calls named event handlers. Script failures never escape as `Err`: each
/// one turns into a single diagnostic plus a typed `EvalOutcome`, and the
/// engine stays usable.
use mlua::{IntoLuaMulti, Lua, Value};

use super::{
    api::{register_all, Capability},
    buffer::ScriptBufferPool,
    libs,
    sandbox::create_vm,
};
use crate::{
    config::EngineConfig,
    error::{BridgeError, BridgeResult},
    hardware::SharedHardware,
    link::SharedLink,
    storage::{Flash, ScriptStore},
};

/// Chunk name scripts are compiled under; shows up in Lua error positions.
const CHUNK_NAME: &str = "eval";

// ── Outcomes ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Ready,
}

/// Result of evaluating a chunk or calling a handler. Failures carry the
/// engine's message; `stage()` supplies the diagnostic prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalOutcome {
    Ok,
    SyntaxError(String),
    MemoryError(String),
    RuntimeError(String),
    HandlerError { handler: Handler, message: String },
}

impl EvalOutcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, EvalOutcome::Ok)
    }

    /// Stage tag used as the prefix of the diagnostic.
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            EvalOutcome::Ok => None,
            EvalOutcome::SyntaxError(_) => Some("!load script: syntax"),
            EvalOutcome::MemoryError(_) => Some("!load script: memory"),
            EvalOutcome::RuntimeError(_) => Some("!exec script: runtime"),
            EvalOutcome::HandlerError { handler, .. } => Some(handler.stage()),
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            EvalOutcome::Ok => None,
            EvalOutcome::SyntaxError(m)
            | EvalOutcome::MemoryError(m)
            | EvalOutcome::RuntimeError(m)
            | EvalOutcome::HandlerError { message: m, .. } => Some(m),
        }
    }
}

/// Where an evaluation failure is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSink {
    /// Back to the host as a diagnostic.
    HostLink,
    /// Debug console only.
    Debug,
}

/// Named globals the bridge calls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Handler {
    Init,
    Toward,
    Metro,
    Stream,
}

impl Handler {
    pub fn name(self) -> &'static str {
        match self {
            Handler::Init => "init",
            Handler::Toward => "toward_handler",
            Handler::Metro => "metro_handler",
            Handler::Stream => "stream_handler",
        }
    }

    /// Diagnostic prefix for a failing call.
    pub fn stage(self) -> &'static str {
        match self {
            Handler::Init => "!error running init",
            Handler::Toward => "!error running toward_handler",
            Handler::Metro => "!error running metro_handler",
            Handler::Stream => "!error: input stream",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupSource {
    UserScript,
    Default,
}

/// What boot ran and how it went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupReport {
    pub source: StartupSource,
    pub outcome: EvalOutcome,
}

// ── Error helpers ─────────────────────────────────────────────────────────────

pub(crate) fn is_memory_error(err: &mlua::Error) -> bool {
    match err {
        mlua::Error::MemoryError(_) => true,
        mlua::Error::CallbackError { cause, .. } => is_memory_error(cause),
        _ => false,
    }
}

/// Message text without the traceback mlua attaches to callback errors.
pub(crate) fn describe(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => describe(cause),
        mlua::Error::SyntaxError { message, .. } => message.clone(),
        mlua::Error::RuntimeError(message) | mlua::Error::MemoryError(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Stage of a bootstrap that failed for a reason other than memory.
const BOOTSTRAP_STAGE: &str = "!load library";

/// Compile then run `bytes` as one chunk, classifying any failure.
fn run_chunk(lua: &Lua, bytes: &[u8], name: &str) -> EvalOutcome {
    let func = match lua.load(bytes).set_name(name).into_function() {
        Ok(func) => func,
        Err(e) if is_memory_error(&e) => return EvalOutcome::MemoryError(describe(&e)),
        Err(e) => return EvalOutcome::SyntaxError(describe(&e)),
    };
    match func.call::<()>(()) {
        Ok(()) => EvalOutcome::Ok,
        Err(e) if is_memory_error(&e) => EvalOutcome::MemoryError(describe(&e)),
        Err(e) => EvalOutcome::RuntimeError(describe(&e)),
    }
}

// ── Evaluator ─────────────────────────────────────────────────────────────────

pub struct Evaluator {
    lua: Option<Lua>,
    hw: SharedHardware,
    link: SharedLink,
    config: EngineConfig,
}

impl Evaluator {
    pub fn new(config: EngineConfig, hw: SharedHardware, link: SharedLink) -> Self {
        Self {
            lua: None,
            hw,
            link,
            config,
        }
    }

    pub fn state(&self) -> EngineState {
        if self.lua.is_some() {
            EngineState::Ready
        } else {
            EngineState::Uninitialized
        }
    }

    /// Build the VM, register capabilities and run the bootstrap.
    ///
    /// Only allocator exhaustion is fatal. A bootstrap that fails any other
    /// way is logged and the engine is still usable for plain Lua.
    pub fn init(&mut self) -> BridgeResult<()> {
        self.init_with(libs::BOOTSTRAP)
    }

    fn init_with(&mut self, bootstrap: &str) -> BridgeResult<()> {
        if self.lua.is_some() {
            log::debug!("[script] init: already running");
            return Ok(());
        }

        let fatal = |e: mlua::Error| {
            if is_memory_error(&e) {
                BridgeError::BootstrapOutOfMemory(describe(&e))
            } else {
                BridgeError::Lua(e)
            }
        };
        let lua = create_vm(&self.config).map_err(fatal)?;
        register_all(
            &lua,
            self.hw.clone(),
            self.link.clone(),
            self.config.metro_reserved,
        )
        .map_err(fatal)?;

        match run_chunk(&lua, bootstrap.as_bytes(), "bootstrap") {
            EvalOutcome::Ok => log::info!("[script] engine ready"),
            EvalOutcome::MemoryError(msg) => return Err(BridgeError::BootstrapOutOfMemory(msg)),
            failed => {
                let line = format!(
                    "{BOOTSTRAP_STAGE}: bootstrap: {}",
                    failed.message().unwrap_or_default()
                );
                log::warn!("[script] {line}");
                self.link.send_error(&line);
            }
        }
        self.lua = Some(lua);
        Ok(())
    }

    /// Drop the VM. Safe to call when already torn down.
    pub fn teardown(&mut self) {
        if self.lua.take().is_some() {
            log::info!("[script] engine torn down");
        }
    }

    /// Evaluate `bytes` as one chunk. A failure produces exactly one
    /// diagnostic on `sink`.
    pub fn evaluate(&self, bytes: &[u8], sink: ErrorSink) -> EvalOutcome {
        let outcome = match &self.lua {
            Some(lua) => run_chunk(lua, bytes, CHUNK_NAME),
            None => EvalOutcome::RuntimeError(BridgeError::EngineNotReady.to_string()),
        };
        self.report(&outcome, sink);
        outcome
    }

    /// One diagnostic line for a failed outcome; nothing for `Ok`.
    fn report(&self, outcome: &EvalOutcome, sink: ErrorSink) {
        let (Some(stage), Some(msg)) = (outcome.stage(), outcome.message()) else {
            return;
        };
        let line = format!("{stage}: {msg}");
        log::warn!("[script] {line}");
        if sink == ErrorSink::HostLink {
            self.link.send_error(&line);
        }
    }

    /// Call a handler global if the script defines one. A missing handler is
    /// not an error; a failing one is reported on the host link.
    pub fn invoke_handler(&self, handler: Handler, args: impl IntoLuaMulti) -> EvalOutcome {
        let Some(lua) = &self.lua else {
            return self.handler_failed(handler, &BridgeError::EngineNotReady.to_string());
        };
        let result = match lua.globals().get::<Value>(handler.name()) {
            Ok(Value::Nil) => return EvalOutcome::Ok,
            Ok(Value::Function(f)) => f.call::<()>(args),
            Ok(other) => Err(mlua::Error::RuntimeError(format!(
                "{} is a {}, not a function",
                handler.name(),
                other.type_name()
            ))),
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => EvalOutcome::Ok,
            Err(e) => self.handler_failed(handler, &describe(&e)),
        }
    }

    fn handler_failed(&self, handler: Handler, msg: &str) -> EvalOutcome {
        let outcome = EvalOutcome::HandlerError {
            handler,
            message: msg.to_string(),
        };
        self.report(&outcome, ErrorSink::HostLink);
        outcome
    }

    /// Evaluate the stored user script, or the built-in default when there is
    /// none or it can't be read. A stored script that fails is reported and
    /// left in place.
    pub fn load_startup_script<F: Flash>(
        &self,
        store: &ScriptStore<F>,
        pool: &ScriptBufferPool,
    ) -> StartupReport {
        if store.has_user_script() {
            match pool.allocate() {
                Ok(mut buf) => match buf.fill_from(|dst| store.read_user_script(dst)) {
                    Ok(len) => {
                        log::info!("[script] running user script ({len} bytes)");
                        let outcome = self.evaluate(buf.as_slice(), ErrorSink::HostLink);
                        if !outcome.is_ok() {
                            log::warn!("[script] failed to load user script");
                        }
                        return StartupReport {
                            source: StartupSource::UserScript,
                            outcome,
                        };
                    }
                    Err(e) => {
                        log::warn!("[script] can't read user script: {e}");
                        self.link.send_error(&format!("!storage: {e}"));
                    }
                },
                Err(e) => {
                    log::warn!("[script] no buffer for user script: {e}");
                    self.link.send_error(&format!("!script: {e}"));
                }
            }
        }

        log::info!("[script] running default script");
        StartupReport {
            source: StartupSource::Default,
            outcome: self.evaluate(libs::DEFAULT_SCRIPT.as_bytes(), ErrorSink::Debug),
        }
    }

    /// Hand control to the script by calling its `init()`.
    pub fn begin(&self) -> EvalOutcome {
        log::info!("[script] init()");
        self.invoke_handler(Handler::Init, ())
    }

    /// Capability globals currently bound to functions.
    pub fn capability_table(&self) -> Vec<&'static str> {
        let Some(lua) = &self.lua else {
            return Vec::new();
        };
        let globals = lua.globals();
        Capability::ALL
            .into_iter()
            .map(Capability::name)
            .filter(|name| matches!(globals.get::<Value>(*name), Ok(Value::Function(_))))
            .collect()
    }
}
