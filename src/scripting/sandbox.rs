/// `scripting/sandbox.rs` - which Lua standard libraries the engine gets
///
/// The module has no file system or OS to expose, so the VM is built without
/// `io`, `os`, `package` or `debug`. `dofile` and `print` are rebound by the
/// bootstrap to go through the host link instead.
use mlua::{Lua, LuaOptions, Result as LuaResult, StdLib};

use crate::config::EngineConfig;

/// Standard libraries loaded into every engine VM.
pub fn std_libs() -> StdLib {
    StdLib::TABLE | StdLib::STRING | StdLib::MATH | StdLib::COROUTINE | StdLib::UTF8
}

/// Creates a new Lua VM with the restricted library set and, when
/// configured, a heap limit.
pub fn create_vm(config: &EngineConfig) -> LuaResult<Lua> {
    let lua = Lua::new_with(std_libs(), LuaOptions::default())?;
    if let Some(limit) = config.memory_limit {
        lua.set_memory_limit(limit)?;
    }
    Ok(lua)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mlua::Value;

    #[test]
    fn host_facing_libraries_are_absent() {
        let lua = create_vm(&EngineConfig::default()).unwrap();
        let globals = lua.globals();
        for name in ["io", "os", "package", "debug"] {
            assert!(
                matches!(globals.get::<Value>(name).unwrap(), Value::Nil),
                "{name} should not be loaded"
            );
        }
        assert!(matches!(globals.get::<Value>("string").unwrap(), Value::Table(_)));
    }

    #[test]
    fn memory_limit_is_applied() {
        let config = EngineConfig {
            memory_limit: Some(512 * 1024),
            ..EngineConfig::default()
        };
        let lua = create_vm(&config).unwrap();
        let err = lua
            .load("local t = {} for i = 1, 1e7 do t[i] = i end")
            .exec()
            .unwrap_err();
        assert!(matches!(err, mlua::Error::MemoryError(_)));
    }
}
