/// `runtime.rs` - the host-side main loop
///
/// One current-thread task owns the `Bridge`. It waits on two sources: lines
/// arriving on stdin (the host link) and a fixed tick that advances the
/// simulated hardware and dispatches whatever events it produced. Nothing
/// else touches the engine, so evaluations never overlap.
use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncBufReadExt, BufReader},
    time::{self, Instant, MissedTickBehavior},
};

use crate::{
    error::BridgeResult,
    hardware::SimHardware,
    state::{is_fatal, Bridge},
    storage::Flash,
};

pub async fn serve<F: Flash>(
    mut bridge: Bridge<F>,
    sim: Arc<SimHardware>,
    tick: Duration,
) -> BridgeResult<()> {
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut line = Vec::new();
    let mut ticker = time::interval(tick);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_tick = Instant::now();

    log::info!("[runtime] serving host link on stdin, tick {tick:?}");
    loop {
        tokio::select! {
            // read_until keeps partial input in `line` if the tick wins the race
            read = stdin.read_until(b'\n', &mut line) => {
                if read? == 0 {
                    log::info!("[runtime] host link closed");
                    return Ok(());
                }
                handle_input(&mut bridge, &line)?;
                line.clear();
            }
            _ = ticker.tick() => {
                let now = Instant::now();
                for event in sim.poll(now - last_tick) {
                    bridge.dispatch(event);
                }
                last_tick = now;
            }
        }
    }
}

/// Script text keeps its line ending so multi-line transfers reassemble
/// exactly. CRLF from terminal hosts is stored as a plain newline.
fn handle_input<F: Flash>(bridge: &mut Bridge<F>, line: &[u8]) -> BridgeResult<()> {
    let normalised;
    let line = match line.strip_suffix(b"\r\n") {
        Some(body) => {
            normalised = [body, &b"\n"[..]].concat();
            &normalised[..]
        }
        None => line,
    };
    match bridge.handle_line(line) {
        Ok(response) => {
            log::debug!("[runtime] {response:?}");
            Ok(())
        }
        Err(e) if is_fatal(&e) => Err(e),
        Err(e) => {
            log::debug!("[runtime] {e}");
            Ok(())
        }
    }
}
