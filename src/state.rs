/// `state.rs` - the bridge context
///
/// Everything the bridge owns lives in one `Bridge`: the engine, the
/// reception state machine with its store and buffer pool, the dispatcher,
/// and handles to the hardware and host link. The runtime holds it and feeds
/// it host input and hardware events, one at a time.
use crate::{
    config::BridgeConfig,
    error::{BridgeError, BridgeResult},
    hardware::{HardwareEvent, SharedHardware},
    link::{HostCommand, SharedLink},
    repl::{Handled, ReceptionOutcome, Repl, ReplMode},
    scripting::{EvalOutcome, Evaluator, EventDispatcher, ScriptBufferPool, StartupReport},
    storage::{Flash, ScriptStore},
};

pub const VERSION: &str = concat!("script-bridge ", env!("CARGO_PKG_VERSION"));

/// Result of one line of host input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostResponse {
    Input(Handled),
    Reception(ReceptionOutcome),
    Printed(usize),
    Reset(StartupReport),
    Bootloader,
    Version,
}

pub struct Bridge<F: Flash> {
    engine: Evaluator,
    repl: Repl<F>,
    dispatcher: EventDispatcher,
    hw: SharedHardware,
    link: SharedLink,
}

impl<F: Flash> Bridge<F> {
    pub fn new(config: &BridgeConfig, flash: F, hw: SharedHardware, link: SharedLink) -> Self {
        let engine = Evaluator::new(config.engine.clone(), hw.clone(), link.clone());
        let repl = Repl::new(
            ScriptStore::new(flash),
            ScriptBufferPool::new(config.script_capacity),
            link.clone(),
            config.link_chunk_size,
        );
        Self {
            engine,
            repl,
            dispatcher: EventDispatcher::new(config.engine.metro_reserved),
            hw,
            link,
        }
    }

    pub fn engine(&self) -> &Evaluator {
        &self.engine
    }

    pub fn repl(&self) -> &Repl<F> {
        &self.repl
    }

    pub fn repl_mut(&mut self) -> &mut Repl<F> {
        &mut self.repl
    }

    /// Bring the engine up, run the startup script, then its `init()`.
    pub fn boot(&mut self) -> BridgeResult<StartupReport> {
        self.engine.init()?;
        let report = self
            .engine
            .load_startup_script(self.repl.store(), self.repl.pool());
        log::info!("[bridge] started from {:?}: {:?}", report.source, report.outcome);
        self.engine.begin();
        Ok(report)
    }

    /// Stop the hardware, drop any transfer and rebuild the engine from scratch.
    pub fn soft_reset(&mut self) -> BridgeResult<StartupReport> {
        log::info!("[bridge] soft reset");
        self.hw.reset();
        self.repl.reset();
        self.engine.teardown();
        self.boot()
    }

    /// One line from the host: a control token or script text.
    pub fn handle_line(&mut self, line: &[u8]) -> BridgeResult<HostResponse> {
        match HostCommand::parse(line) {
            Some(command) => self.handle_command(command),
            None => Ok(HostResponse::Input(self.handle_host_bytes(line))),
        }
    }

    pub fn handle_host_bytes(&mut self, bytes: &[u8]) -> Handled {
        self.repl.handle(&self.engine, bytes)
    }

    pub fn handle_command(&mut self, command: HostCommand) -> BridgeResult<HostResponse> {
        log::debug!("[bridge] {}", command.token());
        match command {
            HostCommand::StartReception => Ok(HostResponse::Reception(
                self.repl.set_mode(&self.engine, ReplMode::Reception)?,
            )),
            HostCommand::EndReception => Ok(HostResponse::Reception(
                self.repl.set_mode(&self.engine, ReplMode::Normal)?,
            )),
            HostCommand::PrintScript => Ok(HostResponse::Printed(self.repl.print_script()?)),
            HostCommand::Reset => Ok(HostResponse::Reset(self.soft_reset()?)),
            HostCommand::Bootloader => {
                self.hw.enter_bootloader();
                Ok(HostResponse::Bootloader)
            }
            HostCommand::Version => {
                self.link.send_chunk(VERSION);
                Ok(HostResponse::Version)
            }
        }
    }

    pub fn dispatch(&self, event: HardwareEvent) -> EvalOutcome {
        self.dispatcher.dispatch(&self.engine, event)
    }
}

/// Errors the runtime must stop on. Everything else has already been
/// reported to the host and is only logged.
pub fn is_fatal(err: &BridgeError) -> bool {
    matches!(err, BridgeError::BootstrapOutOfMemory(_))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{sync::Arc, time::Duration};

    use crate::{
        config::EngineConfig,
        hardware::{InputMode, SimHardware},
        link::RecordingLink,
        scripting::{EngineState, ErrorSink, StartupSource},
        storage::MemFlash,
    };

    fn config() -> BridgeConfig {
        BridgeConfig {
            script_capacity: 0x800,
            ..BridgeConfig::default()
        }
    }

    fn bridge() -> (Bridge<MemFlash>, Arc<SimHardware>, RecordingLink) {
        let config = config();
        let sim = Arc::new(SimHardware::new(&config.hardware, config.engine.metro_reserved));
        let link = RecordingLink::new();
        let bridge = Bridge::new(
            &config,
            MemFlash::new(config.script_capacity + crate::storage::HEADER_LEN),
            sim.clone(),
            Arc::new(link.clone()),
        );
        (bridge, sim, link)
    }

    fn upload(bridge: &mut Bridge<MemFlash>, script: &str) -> ReceptionOutcome {
        bridge.handle_line(b"^^s").unwrap();
        for line in script.lines() {
            bridge.handle_line(format!("{line}\n").as_bytes()).unwrap();
        }
        match bridge.handle_line(b"^^e").unwrap() {
            HostResponse::Reception(outcome) => outcome,
            other => panic!("unexpected response {other:?}"),
        }
    }

    #[test]
    fn boots_into_default_script() {
        let (mut bridge, sim, _) = bridge();
        let report = bridge.boot().unwrap();
        assert_eq!(report.source, StartupSource::Default);
        assert_eq!(bridge.engine().state(), EngineState::Ready);
        assert!(matches!(sim.input_mode(0), Some(InputMode::Stream { .. })));
    }

    #[test]
    fn uploaded_script_survives_reset() {
        let (mut bridge, sim, link) = bridge();
        bridge.boot().unwrap();
        let script = "function init()\n  metro[1]:start(0.5)\nend\n";
        assert_eq!(upload(&mut bridge, script), ReceptionOutcome::Saved);
        assert!(link.chunks().contains(&"script saved".to_string()));

        let response = bridge.handle_line(b"^^r").unwrap();
        let HostResponse::Reset(report) = response else {
            panic!("expected reset");
        };
        assert_eq!(report.source, StartupSource::UserScript);
        assert!(sim.metro_running(2));
        // the default script's stream was stopped by the reset
        assert_eq!(sim.input_mode(0), Some(InputMode::None));
    }

    #[test]
    fn saved_script_reads_back_byte_identical() {
        let (mut bridge, _, link) = bridge();
        bridge.boot().unwrap();
        let script = "x = 1\nprint('loaded')\n";
        upload(&mut bridge, script);
        link.take();

        assert_eq!(
            bridge.handle_line(b"^^p").unwrap(),
            HostResponse::Printed(1)
        );
        assert_eq!(link.raw(), vec![script.as_bytes().to_vec()]);
    }

    #[test]
    fn live_code_runs_in_normal_mode() {
        let (mut bridge, _, link) = bridge();
        bridge.boot().unwrap();
        link.take();
        let response = bridge.handle_line(b"print(1 + 2)\n").unwrap();
        assert_eq!(response, HostResponse::Input(Handled::Evaluated(EvalOutcome::Ok)));
        assert_eq!(link.chunks(), vec!["3".to_string()]);
    }

    #[test]
    fn hardware_events_reach_script_handlers() {
        let (mut bridge, sim, link) = bridge();
        bridge.boot().unwrap();
        bridge.handle_line(b"input[1]:set_mode('none')").unwrap();
        bridge
            .handle_line(b"output[2].done = function() print('arrived') end")
            .unwrap();
        bridge.handle_line(b"output[2]:volts(1.0, 0.01)").unwrap();
        link.take();

        for event in sim.poll(Duration::from_millis(20)) {
            assert_eq!(bridge.dispatch(event), EvalOutcome::Ok);
        }
        assert_eq!(link.chunks(), vec!["arrived".to_string()]);
    }

    #[test]
    fn metro_events_reach_user_metros() {
        let (mut bridge, sim, link) = bridge();
        bridge.boot().unwrap();
        bridge.handle_line(b"input[1]:set_mode('none')").unwrap();
        bridge
            .handle_line(b"metro[2].event = function(s) print('tick ' .. s) end")
            .unwrap();
        bridge.handle_line(b"metro[2]:start(0.01, 2)").unwrap();
        link.take();

        for event in sim.poll(Duration::from_millis(50)) {
            bridge.dispatch(event);
        }
        assert_eq!(link.chunks(), vec!["tick 1".to_string(), "tick 2".to_string()]);
    }

    #[test]
    fn events_during_a_transfer_leave_it_intact() {
        let (mut bridge, _, link) = bridge();
        bridge.boot().unwrap();
        bridge
            .handle_line(b"toward_handler = nil metro_handler = nil stream_handler = nil")
            .unwrap();
        bridge.handle_line(b"^^s").unwrap();
        bridge.handle_line(b"kept = 1\n").unwrap();
        link.take();

        for event in [
            HardwareEvent::MotionComplete { channel: 0 },
            HardwareEvent::MetroStage { timer: 2, stage: 0 },
            HardwareEvent::StreamSample { input: 0, value: 0.5 },
        ] {
            assert_eq!(bridge.dispatch(event), EvalOutcome::Ok);
        }
        assert!(link.sent().is_empty());
        assert_eq!(bridge.repl().mode(), ReplMode::Reception);
        assert!(bridge.repl().pool().in_use());

        assert_eq!(
            bridge.handle_line(b"^^e").unwrap(),
            HostResponse::Reception(ReceptionOutcome::Saved)
        );
        let mut out = vec![0u8; 64];
        let n = bridge.repl().store().read_user_script(&mut out).unwrap();
        assert_eq!(&out[..n], b"kept = 1\n");
    }

    #[test]
    fn failed_upload_keeps_previous_script() {
        let (mut bridge, _, link) = bridge();
        bridge.boot().unwrap();
        upload(&mut bridge, "kept = true\n");
        assert!(matches!(
            upload(&mut bridge, "this is not lua\n"),
            ReceptionOutcome::FailedTest(EvalOutcome::SyntaxError(_))
        ));
        assert!(link
            .chunks()
            .contains(&"new user script failed test".to_string()));

        bridge.soft_reset().unwrap();
        assert_eq!(
            bridge.engine().evaluate(b"assert(kept == true)", ErrorSink::HostLink),
            EvalOutcome::Ok
        );
    }

    #[test]
    fn version_and_bootloader_commands() {
        let (mut bridge, sim, link) = bridge();
        bridge.boot().unwrap();
        link.take();
        assert_eq!(bridge.handle_line(b"^^v").unwrap(), HostResponse::Version);
        assert_eq!(link.chunks(), vec![VERSION.to_string()]);
        assert_eq!(bridge.handle_line(b"^^b").unwrap(), HostResponse::Bootloader);
        assert_eq!(sim.bootloader_requests(), 1);
    }

    #[test]
    fn bootstrap_exhaustion_is_fatal() {
        let config = BridgeConfig {
            engine: EngineConfig {
                memory_limit: Some(1024),
                ..EngineConfig::default()
            },
            ..config()
        };
        let sim = Arc::new(SimHardware::new(&config.hardware, 2));
        let mut bridge = Bridge::new(
            &config,
            MemFlash::new(0x1000),
            sim,
            Arc::new(RecordingLink::new()),
        );
        let err = bridge.boot().unwrap_err();
        assert!(is_fatal(&err));
    }
}
