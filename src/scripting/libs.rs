/// `scripting/libs.rs` - Lua sources compiled into the binary
///
/// `c_dofile(name)` only ever loads one of these; there is no file system.
use crate::error::{BridgeError, BridgeResult};

/// Run on every fresh engine. Rebinds `dofile` and `print`, loads the core
/// library.
pub const BOOTSTRAP: &str = include_str!("lua/bootstrap.lua");

/// Evaluated at boot when the store holds no usable user script.
pub const DEFAULT_SCRIPT: &str = include_str!("lua/default.lua");

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Library {
    CrowLib,
    Input,
    Output,
    Metro,
}

impl Library {
    pub const ALL: [Library; 4] = [
        Library::CrowLib,
        Library::Input,
        Library::Output,
        Library::Metro,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Library::CrowLib => "lua_crowlib",
            Library::Input => "lua_input",
            Library::Output => "lua_output",
            Library::Metro => "lua_metro",
        }
    }

    pub fn from_name(name: &str) -> BridgeResult<Library> {
        Self::ALL
            .into_iter()
            .find(|lib| lib.name() == name)
            .ok_or_else(|| BridgeError::UnknownLibrary(name.to_string()))
    }

    pub fn source(self) -> &'static str {
        match self {
            Library::CrowLib => include_str!("lua/crowlib.lua"),
            Library::Input => include_str!("lua/input.lua"),
            Library::Output => include_str!("lua/output.lua"),
            Library::Metro => include_str!("lua/metro.lua"),
        }
    }
}
