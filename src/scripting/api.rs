/// `scripting/api.rs` - registers all Lua global functions
///
/// Provides the capability surface every engine VM starts with. Lua sees
/// 1-based channel, input and metro numbers; the hardware sees 0-based ones,
/// and user metros sit after the reserved timers.
use std::sync::{
    atomic::{AtomicI64, Ordering},
    Arc,
};

use mlua::{Function, Lua, MultiValue, Result as LuaResult, Value, Variadic};

use super::{
    engine::{describe, is_memory_error},
    libs::Library,
};
use crate::{
    bus::{codec, find_command, list_commands, module_list},
    error::BridgeError,
    hardware::{InputMode, Shape, SharedHardware},
    link::SharedLink,
};

/// Every global the engine exposes to scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    CDofile,
    DebugUsart,
    PrintSerial,
    SysBootloader,
    GoToward,
    GetState,
    IoGetInput,
    SetInputMode,
    SendUsb,
    SendIi,
    SetIiAddr,
    MetroStart,
    MetroStop,
    MetroSetTime,
}

impl Capability {
    pub const ALL: [Capability; 14] = [
        Capability::CDofile,
        Capability::DebugUsart,
        Capability::PrintSerial,
        Capability::SysBootloader,
        Capability::GoToward,
        Capability::GetState,
        Capability::IoGetInput,
        Capability::SetInputMode,
        Capability::SendUsb,
        Capability::SendIi,
        Capability::SetIiAddr,
        Capability::MetroStart,
        Capability::MetroStop,
        Capability::MetroSetTime,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Capability::CDofile => "c_dofile",
            Capability::DebugUsart => "debug_usart",
            Capability::PrintSerial => "print_serial",
            Capability::SysBootloader => "sys_bootloader",
            Capability::GoToward => "go_toward",
            Capability::GetState => "get_state",
            Capability::IoGetInput => "io_get_input",
            Capability::SetInputMode => "set_input_mode",
            Capability::SendUsb => "send_usb",
            Capability::SendIi => "send_ii",
            Capability::SetIiAddr => "set_ii_addr",
            Capability::MetroStart => "metro_start",
            Capability::MetroStop => "metro_stop",
            Capability::MetroSetTime => "metro_set_time",
        }
    }

}

/// Register every capability as a global on `lua`.
///
/// `metro_reserved` - hardware timers in front of the first user metro.
pub fn register_all(
    lua: &Lua,
    hw: SharedHardware,
    link: SharedLink,
    metro_reserved: usize,
) -> LuaResult<()> {
    register_bootstrap(lua, Arc::clone(&link))?;
    register_system(lua, Arc::clone(&hw))?;
    register_io(lua, Arc::clone(&hw))?;
    register_usb(lua, link)?;
    register_ii(lua, Arc::clone(&hw))?;
    register_metro(lua, hw, metro_reserved)?;
    Ok(())
}

fn set_global(lua: &Lua, capability: Capability, f: Function) -> LuaResult<()> {
    lua.globals().set(capability.name(), f)
}

fn runtime_error(msg: impl Into<String>) -> mlua::Error {
    mlua::Error::RuntimeError(msg.into())
}

/// 1-based script index to 0-based hardware index.
fn zero_based(index: i64, what: &str) -> LuaResult<usize> {
    if index < 1 {
        return Err(runtime_error(format!(
            "{what} number must be 1 or more, got {index}"
        )));
    }
    Ok((index - 1) as usize)
}

// ── bootstrap ─────────────────────────────────────────────────────────────────

fn register_bootstrap(lua: &Lua, link: SharedLink) -> LuaResult<()> {
    let dofile = {
        let link = Arc::clone(&link);
        lua.create_function(move |lua, name: String| {
            let lib = match Library::from_name(&name) {
                Ok(lib) => lib,
                Err(e) => {
                    log::warn!("[script] {e}");
                    link.send_error(&format!("!load library: {e}"));
                    return Ok(Value::Nil);
                }
            };
            match lua.load(lib.source()).set_name(lib.name()).eval::<Value>() {
                Ok(value) => Ok(value),
                Err(e) if is_memory_error(&e) => Err(e),
                Err(e) => {
                    log::warn!("[script] can't load library {}: {e}", lib.name());
                    link.send_error(&format!("!load library: {}: {}", lib.name(), describe(&e)));
                    Ok(Value::Nil)
                }
            }
        })?
    };
    set_global(lua, Capability::CDofile, dofile)?;

    set_global(
        lua,
        Capability::DebugUsart,
        lua.create_function(|_, msg: mlua::String| {
            log::info!("[script] {}", msg.to_string_lossy());
            Ok(())
        })?,
    )?;

    let print = lua.create_function(move |_, msg: mlua::String| {
        link.send_chunk(&msg.to_string_lossy());
        Ok(())
    })?;
    set_global(lua, Capability::PrintSerial, print)?;
    Ok(())
}

// ── system ────────────────────────────────────────────────────────────────────

fn register_system(lua: &Lua, hw: SharedHardware) -> LuaResult<()> {
    let bootloader = lua.create_function(move |_, ()| {
        log::warn!("[script] sys_bootloader()");
        hw.enter_bootloader();
        Ok(())
    })?;
    set_global(lua, Capability::SysBootloader, bootloader)
}

// ── io ────────────────────────────────────────────────────────────────────────

fn register_io(lua: &Lua, hw: SharedHardware) -> LuaResult<()> {
    let toward = {
        let hw = Arc::clone(&hw);
        lua.create_function(
            move |_, (channel, target, seconds, shape): (i64, f32, f32, Option<String>)| {
                let channel = zero_based(channel, "output")?;
                let shape = match shape.as_deref() {
                    None => Shape::default(),
                    Some(name) => Shape::from_name(name)
                        .ok_or_else(|| runtime_error(format!("unknown shape '{name}'")))?,
                };
                hw.toward(channel, target, seconds * 1000.0, shape);
                Ok(())
            },
        )?
    };
    set_global(lua, Capability::GoToward, toward)?;

    let get_state = {
        let hw = Arc::clone(&hw);
        lua.create_function(move |_, channel: i64| {
            Ok(hw.channel_state(zero_based(channel, "output")?))
        })?
    };
    set_global(lua, Capability::GetState, get_state)?;

    let get_input = {
        let hw = Arc::clone(&hw);
        lua.create_function(move |_, input: i64| {
            Ok(hw.input_value(zero_based(input, "input")?))
        })?
    };
    set_global(lua, Capability::IoGetInput, get_input)?;

    let set_mode = lua.create_function(
        move |_, (input, mode, interval): (i64, String, Option<f32>)| {
            let input = zero_based(input, "input")?;
            let mode = InputMode::parse(&mode, interval)
                .ok_or_else(|| runtime_error(format!("unknown input mode '{mode}'")))?;
            hw.set_input_mode(input, mode);
            Ok(())
        },
    )?;
    set_global(lua, Capability::SetInputMode, set_mode)
}

// ── usb ───────────────────────────────────────────────────────────────────────

fn register_usb(lua: &Lua, link: SharedLink) -> LuaResult<()> {
    let send = lua.create_function(move |_, msg: mlua::String| {
        link.send_raw(&msg.as_bytes());
        Ok(())
    })?;
    set_global(lua, Capability::SendUsb, send)
}

// ── ii ────────────────────────────────────────────────────────────────────────

fn register_ii(lua: &Lua, hw: SharedHardware) -> LuaResult<()> {
    let send = {
        let hw = Arc::clone(&hw);
        lua.create_function(
            move |_, (address, command, args): (u8, u8, Variadic<f32>)| {
                let frame = codec::encode(address, command, &args)
                    .map_err(|e| runtime_error(bus_error(&e)))?;
                let Some(query) = find_command(address, command).filter(|c| c.is_query()) else {
                    hw.bus_send(address, &frame);
                    return Ok(None);
                };
                // queries hand the decoded reply back to the script, nil on no answer
                hw.bus_query(address, &frame)
                    .map(|reply| codec::decode_response(query, &reply))
                    .transpose()
                    .map_err(|e| runtime_error(e.to_string()))
            },
        )?
    };
    set_global(lua, Capability::SendIi, send)?;

    let set_addr = lua.create_function(move |_, index: u8| {
        hw.set_bus_address(index);
        Ok(())
    })?;
    set_global(lua, Capability::SetIiAddr, set_addr)
}

/// Unknown commands name what the address does accept, or the known peers.
fn bus_error(err: &BridgeError) -> String {
    match err {
        BridgeError::UnknownBusCommand { address, .. } => match list_commands(*address) {
            known if known.is_empty() => format!("{err}; known modules: {}", module_list()),
            known => format!("{err}; expected one of: {}", known.join(", ")),
        },
        other => other.to_string(),
    }
}

// ── metro ─────────────────────────────────────────────────────────────────────

fn register_metro(lua: &Lua, hw: SharedHardware, reserved: usize) -> LuaResult<()> {
    let start = {
        let hw = Arc::clone(&hw);
        // A call without an index restarts the metro used last.
        let last = Arc::new(AtomicI64::new(0));
        lua.create_function(
            move |_,
                  (index, seconds, count, stage): (
                Option<i64>,
                Option<f32>,
                Option<i64>,
                Option<i64>,
            )| {
                if let Some(index) = index {
                    last.store(zero_based(index, "metro")? as i64, Ordering::Relaxed);
                }
                let timer = last.load(Ordering::Relaxed) as usize + reserved;
                let seconds = seconds.filter(|s| *s >= 0.0);
                let count = count
                    .filter(|c| *c >= 0)
                    .map(|c| c.min(u32::MAX as i64) as u32);
                let stage = stage.map_or(0, |s| (s - 1).max(0) as usize);
                hw.metro_start(timer, seconds, count, stage);
                Ok(())
            },
        )?
    };
    set_global(lua, Capability::MetroStart, start)?;

    let stop = {
        let hw = Arc::clone(&hw);
        lua.create_function(move |lua, args: MultiValue| {
            let mut args = args.into_iter();
            let (Some(index), None) = (args.next(), args.next()) else {
                return Err(runtime_error("wrong number of arguments"));
            };
            let index = zero_based(lua.unpack::<i64>(index)?, "metro")?;
            hw.metro_stop(index + reserved);
            Ok(())
        })?
    };
    set_global(lua, Capability::MetroStop, stop)?;

    let set_time = lua.create_function(move |lua, args: MultiValue| {
        let mut args = args.into_iter();
        let (Some(index), Some(seconds), None) = (args.next(), args.next(), args.next()) else {
            return Err(runtime_error("wrong number of arguments"));
        };
        let index = zero_based(lua.unpack::<i64>(index)?, "metro")?;
        let seconds = lua.unpack::<f32>(seconds)?;
        hw.metro_set_time(index + reserved, seconds);
        Ok(())
    })?;
    set_global(lua, Capability::MetroSetTime, set_time)
}
