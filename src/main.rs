fn main() {
    if let Err(e) = script_bridge_lib::run() {
        log::error!("[bridge] fatal: {e}");
        eprintln!("script-bridge: {e}");
        std::process::exit(1);
    }
}
