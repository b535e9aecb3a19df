pub mod bus;
pub mod config;
pub mod error;
pub mod hardware;
pub mod link;
pub mod repl;
pub mod runtime;
pub mod scripting;
pub mod state;
pub mod storage;

use std::{sync::Arc, time::Duration};

use config::BridgeConfig;
use error::BridgeResult;
use hardware::SimHardware;
use link::{SharedLink, StdoutLink};
use state::Bridge;
use storage::{FileFlash, HEADER_LEN};

pub fn run() -> BridgeResult<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = BridgeConfig::from_env()?;
    config.validate()?;
    log::info!(
        "[bridge] {} (script capacity {} bytes, flash image {})",
        state::VERSION,
        config.script_capacity,
        config.flash_path.display()
    );

    // ── Collaborators ────────────────────────────────────────────────────────
    //
    // Each flash bank holds a header plus a full-capacity script, so anything
    // that fits the reception buffer also fits the store.

    let flash = FileFlash::open(&config.flash_path, config.script_capacity + HEADER_LEN)?;
    let sim = Arc::new(SimHardware::new(
        &config.hardware,
        config.engine.metro_reserved,
    ));
    let link: SharedLink = Arc::new(StdoutLink);

    let mut bridge = Bridge::new(&config, flash, sim.clone(), link);
    bridge.boot()?;

    let tick = Duration::from_millis(config.hardware.tick_ms);
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(runtime::serve(bridge, sim, tick))
}
