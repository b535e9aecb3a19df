/// `repl.rs` - reception state machine for host input
///
/// In `Normal` mode every chunk from the host is evaluated on arrival. In
/// `Reception` mode chunks are collected into the script buffer until the
/// host ends the transfer; the whole script is then test-run and, only if
/// that succeeds, written to the store.
use crate::{
    error::BridgeResult,
    link::SharedLink,
    scripting::{ErrorSink, EvalOutcome, Evaluator, ScriptBuffer, ScriptBufferPool},
    storage::{Flash, ScriptStore},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplMode {
    #[default]
    Normal,
    Reception,
}

/// What happened to one chunk of host input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Handled {
    Evaluated(EvalOutcome),
    Buffered,
    /// The running transfer already overflowed; the chunk was ignored.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceptionOutcome {
    /// A transfer started.
    Receiving,
    Saved,
    /// The script passed its test run but the store write failed.
    StorageFailed,
    FailedTest(EvalOutcome),
    /// The transfer overflowed the buffer and was thrown away.
    Discarded,
    /// End of transfer while no transfer was running.
    NotReceiving,
}

pub struct Repl<F: Flash> {
    mode: ReplMode,
    pending: Option<ScriptBuffer>,
    overflowed: bool,
    store: ScriptStore<F>,
    pool: ScriptBufferPool,
    link: SharedLink,
    chunk_size: usize,
}

impl<F: Flash> Repl<F> {
    pub fn new(
        store: ScriptStore<F>,
        pool: ScriptBufferPool,
        link: SharedLink,
        chunk_size: usize,
    ) -> Self {
        Self {
            mode: ReplMode::Normal,
            pending: None,
            overflowed: false,
            store,
            pool,
            link,
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn mode(&self) -> ReplMode {
        self.mode
    }

    pub fn store(&self) -> &ScriptStore<F> {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut ScriptStore<F> {
        &mut self.store
    }

    pub fn pool(&self) -> &ScriptBufferPool {
        &self.pool
    }

    /// Route one chunk of host input according to the current mode.
    pub fn handle(&mut self, engine: &Evaluator, bytes: &[u8]) -> Handled {
        match self.mode {
            ReplMode::Normal => Handled::Evaluated(engine.evaluate(bytes, ErrorSink::HostLink)),
            ReplMode::Reception => self.receive(bytes),
        }
    }

    fn receive(&mut self, bytes: &[u8]) -> Handled {
        let Some(buf) = self.pending.as_mut() else {
            return Handled::Dropped;
        };
        match buf.append(bytes) {
            Ok(()) => Handled::Buffered,
            Err(e) => {
                log::warn!("[repl] {e}, dropping transfer");
                self.link.send_error(&format!("!script: {e}"));
                self.pending = None;
                self.overflowed = true;
                Handled::Dropped
            }
        }
    }

    /// Start collecting a new script. Entering again mid-transfer throws the
    /// partial script away and starts over.
    pub fn enter_reception(&mut self) -> BridgeResult<()> {
        if self.mode == ReplMode::Reception {
            log::info!("[repl] restarting transfer");
        }
        self.pending = None;
        self.overflowed = false;

        match self.pool.allocate() {
            Ok(buf) => {
                self.pending = Some(buf);
                self.mode = ReplMode::Reception;
                log::info!("[repl] receiving script");
                Ok(())
            }
            Err(e) => {
                log::warn!("[repl] can't start transfer: {e}");
                self.link.send_error(&format!("!script: {e}"));
                self.mode = ReplMode::Normal;
                Err(e)
            }
        }
    }

    /// Finish the transfer: test-run the script and keep it only if it runs.
    pub fn exit_reception(&mut self, engine: &Evaluator) -> ReceptionOutcome {
        if self.mode != ReplMode::Reception {
            log::warn!("[repl] end of transfer without a transfer");
            return ReceptionOutcome::NotReceiving;
        }
        self.mode = ReplMode::Normal;

        let Some(buf) = self.pending.take() else {
            self.overflowed = false;
            log::info!("[repl] oversized transfer discarded");
            return ReceptionOutcome::Discarded;
        };

        let outcome = engine.evaluate(buf.as_slice(), ErrorSink::HostLink);
        if !outcome.is_ok() {
            self.link.send_chunk("new user script failed test");
            return ReceptionOutcome::FailedTest(outcome);
        }

        match self.store.write_user_script(buf.as_slice()) {
            Ok(()) => {
                self.link.send_chunk("script saved");
                ReceptionOutcome::Saved
            }
            Err(e) => {
                log::warn!("[repl] {e}");
                self.link.send_error("!storage: flash write failed");
                ReceptionOutcome::StorageFailed
            }
        }
    }

    /// Mode switch as the host link requests it.
    pub fn set_mode(&mut self, engine: &Evaluator, mode: ReplMode) -> BridgeResult<ReceptionOutcome> {
        match mode {
            ReplMode::Reception => self
                .enter_reception()
                .map(|()| ReceptionOutcome::Receiving),
            ReplMode::Normal => Ok(self.exit_reception(engine)),
        }
    }

    /// Send the stored script back over the host link in `chunk_size`
    /// pieces. Returns the number of pieces sent.
    pub fn print_script(&self) -> BridgeResult<usize> {
        if !self.store.has_user_script() {
            self.link.send_chunk("no user script.");
            return Ok(0);
        }

        let mut buf = self.pool.allocate().inspect_err(|e| {
            self.link.send_error(&format!("!script: {e}"));
        })?;
        let len = buf
            .fill_from(|dst| self.store.read_user_script(dst))
            .inspect_err(|e| {
                log::warn!("[repl] {e}");
                self.link.send_error("!storage: can't read user script");
            })?;

        let mut sent = 0;
        for piece in buf.as_slice().chunks(self.chunk_size) {
            self.link.send_raw(piece);
            sent += 1;
        }
        log::debug!("[repl] printed {len} bytes in {sent} piece(s)");
        Ok(sent)
    }

    /// Drop any transfer in progress and go back to `Normal`.
    pub fn reset(&mut self) {
        self.pending = None;
        self.overflowed = false;
        self.mode = ReplMode::Normal;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::{
        config::{EngineConfig, HardwareConfig},
        error::BridgeError,
        hardware::SimHardware,
        link::RecordingLink,
        storage::MemFlash,
    };

    const BANK: usize = 4096;

    fn rig(capacity: usize) -> (Repl<MemFlash>, Evaluator, RecordingLink) {
        let sim = Arc::new(SimHardware::new(&HardwareConfig::default(), 2));
        let link = RecordingLink::new();
        let mut engine = Evaluator::new(EngineConfig::default(), sim, Arc::new(link.clone()));
        engine.init().unwrap();
        let repl = Repl::new(
            ScriptStore::new(MemFlash::new(BANK)),
            ScriptBufferPool::new(capacity),
            Arc::new(link.clone()),
            512,
        );
        (repl, engine, link)
    }

    #[test]
    fn normal_mode_evaluates_immediately() {
        let (mut repl, engine, link) = rig(1024);
        assert_eq!(
            repl.handle(&engine, b"print('now')"),
            Handled::Evaluated(EvalOutcome::Ok)
        );
        assert_eq!(link.chunks(), vec!["now".to_string()]);
        assert!(!repl.store().has_user_script());
    }

    #[test]
    fn chunks_are_buffered_then_saved() {
        let (mut repl, engine, link) = rig(1024);
        repl.enter_reception().unwrap();
        assert_eq!(repl.mode(), ReplMode::Reception);
        assert_eq!(repl.handle(&engine, b"x = 1\n"), Handled::Buffered);
        assert_eq!(repl.handle(&engine, b"y = 2\n"), Handled::Buffered);
        // nothing runs until the transfer ends
        assert_eq!(
            engine.evaluate(b"assert(x == nil)", ErrorSink::HostLink),
            EvalOutcome::Ok
        );

        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::Saved);
        assert_eq!(repl.mode(), ReplMode::Normal);
        assert_eq!(link.chunks(), vec!["script saved".to_string()]);
        assert!(!repl.pool().in_use());

        let mut out = vec![0u8; 64];
        let n = repl.store().read_user_script(&mut out).unwrap();
        assert_eq!(&out[..n], b"x = 1\ny = 2\n");
    }

    #[test]
    fn failed_test_leaves_store_unchanged() {
        let (mut repl, engine, link) = rig(1024);
        repl.store_mut().write_user_script(b"old = true").unwrap();

        repl.enter_reception().unwrap();
        repl.handle(&engine, b"error('nope')");
        let outcome = repl.exit_reception(&engine);
        assert!(matches!(
            outcome,
            ReceptionOutcome::FailedTest(EvalOutcome::RuntimeError(_))
        ));
        assert_eq!(link.chunks(), vec!["new user script failed test".to_string()]);
        assert_eq!(link.errors().len(), 1);
        assert!(!repl.pool().in_use());

        let mut out = vec![0u8; 64];
        let n = repl.store().read_user_script(&mut out).unwrap();
        assert_eq!(&out[..n], b"old = true");
    }

    #[test]
    fn storage_failure_is_not_reported_as_saved() {
        let (mut repl, engine, link) = rig(1024);
        repl.store_mut().flash_mut().fail_programs_after(0);
        repl.enter_reception().unwrap();
        repl.handle(&engine, b"z = 3");
        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::StorageFailed);
        assert!(link.chunks().is_empty());
        assert_eq!(link.errors(), vec!["!storage: flash write failed".to_string()]);
        assert!(!repl.store().has_user_script());
    }

    #[test]
    fn overflow_reports_once_and_discards() {
        let (mut repl, engine, link) = rig(1024);
        repl.enter_reception().unwrap();
        assert_eq!(repl.handle(&engine, &[b' '; 1000]), Handled::Buffered);
        assert_eq!(repl.handle(&engine, &[b' '; 100]), Handled::Dropped);
        assert!(!repl.pool().in_use());
        assert_eq!(repl.handle(&engine, b"x = 1"), Handled::Dropped);
        assert_eq!(link.errors().len(), 1);

        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::Discarded);
        assert!(!repl.store().has_user_script());
        assert!(!repl.overflowed);
    }

    #[test]
    fn allocation_failure_keeps_normal_mode() {
        let (mut repl, engine, link) = rig(usize::MAX);
        assert!(matches!(repl.enter_reception(), Err(BridgeError::OutOfMemory)));
        assert_eq!(repl.mode(), ReplMode::Normal);
        assert_eq!(link.errors(), vec!["!script: out of memory".to_string()]);
        assert_eq!(
            repl.handle(&engine, b"print('still here')"),
            Handled::Evaluated(EvalOutcome::Ok)
        );
    }

    #[test]
    fn reentering_restarts_the_transfer() {
        let (mut repl, engine, _) = rig(1024);
        repl.enter_reception().unwrap();
        repl.handle(&engine, b"first = 1");
        repl.enter_reception().unwrap();
        repl.handle(&engine, b"second = 2");
        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::Saved);

        let mut out = vec![0u8; 64];
        let n = repl.store().read_user_script(&mut out).unwrap();
        assert_eq!(&out[..n], b"second = 2");
    }

    #[test]
    fn empty_transfer_saves_an_empty_script() {
        let (mut repl, engine, link) = rig(1024);
        repl.enter_reception().unwrap();
        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::Saved);
        assert_eq!(repl.mode(), ReplMode::Normal);
        assert!(!repl.pool().in_use());
        assert!(link.errors().is_empty());

        assert!(repl.store().has_user_script());
        let mut out = vec![0u8; 64];
        assert_eq!(repl.store().read_user_script(&mut out).unwrap(), 0);
    }

    #[test]
    fn exit_without_transfer_is_a_no_op() {
        let (mut repl, engine, link) = rig(1024);
        assert_eq!(repl.exit_reception(&engine), ReceptionOutcome::NotReceiving);
        assert!(link.sent().is_empty());
    }

    #[test]
    fn set_mode_drives_both_transitions() {
        let (mut repl, engine, _) = rig(1024);
        assert_eq!(
            repl.set_mode(&engine, ReplMode::Reception).unwrap(),
            ReceptionOutcome::Receiving
        );
        repl.handle(&engine, b"w = 4");
        assert_eq!(
            repl.set_mode(&engine, ReplMode::Normal).unwrap(),
            ReceptionOutcome::Saved
        );
    }

    #[test]
    fn print_without_script() {
        let (repl, _, link) = rig(1024);
        assert_eq!(repl.print_script().unwrap(), 0);
        assert_eq!(link.chunks(), vec!["no user script.".to_string()]);
        assert!(!repl.pool().in_use());
    }

    #[test]
    fn print_splits_into_link_chunks() {
        let (mut repl, _, link) = rig(2048);
        let script: Vec<u8> = (0..600).map(|i| b'a' + (i % 26) as u8).collect();
        repl.store_mut().write_user_script(&script).unwrap();

        assert_eq!(repl.print_script().unwrap(), 2);
        let raw = link.raw();
        assert_eq!(raw.len(), 2);
        assert_eq!(raw[0].len(), 512);
        assert_eq!(raw[1].len(), 88);
        assert_eq!(raw.concat(), script);
        assert!(!repl.pool().in_use());
    }

    #[test]
    fn print_exact_multiple_ends_on_full_chunk() {
        let (mut repl, _, link) = rig(2048);
        repl.store_mut().write_user_script(&[b'-'; 1024]).unwrap();
        assert_eq!(repl.print_script().unwrap(), 2);
        assert!(link.raw().iter().all(|piece| piece.len() == 512));
    }

    #[test]
    fn print_reports_allocation_failure() {
        let (mut repl, _, link) = rig(1024);
        repl.store_mut().write_user_script(b"x = 1").unwrap();
        let _held = repl.pool().allocate().unwrap();
        assert!(matches!(repl.print_script(), Err(BridgeError::BufferInUse)));
        assert_eq!(link.errors().len(), 1);
        assert!(link.raw().is_empty());
    }

    #[test]
    fn reset_drops_pending_transfer() {
        let (mut repl, engine, _) = rig(1024);
        repl.enter_reception().unwrap();
        repl.handle(&engine, b"pending = true");
        repl.reset();
        assert_eq!(repl.mode(), ReplMode::Normal);
        assert!(!repl.pool().in_use());
    }
}
