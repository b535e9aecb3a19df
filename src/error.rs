/// `error.rs` - bridge-wide error type
///
/// Every fallible operation in the crate returns `BridgeResult<T>`.
/// Failures that a script or the host can trigger are always recoverable:
/// the caller turns them into one diagnostic line on the host link and keeps
/// serving input. `BootstrapOutOfMemory` is the only variant treated as fatal.
use thiserror::Error;

pub type BridgeResult<T> = std::result::Result<T, BridgeError>;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("out of memory")]
    OutOfMemory,

    #[error("script buffer already in use")]
    BufferInUse,

    #[error("script too long: {len} + {incoming} bytes exceeds capacity of {capacity}")]
    BufferOverflow {
        len: usize,
        incoming: usize,
        capacity: usize,
    },

    #[error("storage read failed: {0}")]
    StorageRead(String),

    #[error("storage write failed: {0}")]
    StorageWrite(String),

    #[error("can't find library: {0}")]
    UnknownLibrary(String),

    #[error("unknown bus command {command:#04x} for address {address:#04x}")]
    UnknownBusCommand { address: u8, command: u8 },

    #[error("bus argument error: {0}")]
    BusArgument(String),

    #[error("script engine not initialised")]
    EngineNotReady,

    #[error("out of memory while bootstrapping the script engine: {0}")]
    BootstrapOutOfMemory(String),

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overflow_message_names_sizes() {
        let err = BridgeError::BufferOverflow {
            len: 1000,
            incoming: 200,
            capacity: 1024,
        };
        assert_eq!(
            err.to_string(),
            "script too long: 1000 + 200 bytes exceeds capacity of 1024"
        );
    }

    #[test]
    fn bus_command_formats_hex() {
        let err = BridgeError::UnknownBusCommand {
            address: 0x70,
            command: 0x2a,
        };
        assert_eq!(err.to_string(), "unknown bus command 0x2a for address 0x70");
    }
}
