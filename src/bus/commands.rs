/// `bus/commands.rs` - compiled-in command table for the inter-module bus
///
/// Pure data. Lookups never fall back to a default descriptor: an unknown
/// `(address, command)` pair is `None` and callers treat it as a protocol error.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgType {
    Void,
    U8,
    S8,
    U16,
    S16,
    /// Signed 16-bit voltage, 16384 counts per 10 V.
    S16V,
    /// 32-bit float, only spoken between script modules.
    Float,
}

impl ArgType {
    pub fn name(self) -> &'static str {
        match self {
            ArgType::Void => "void",
            ArgType::U8 => "u8",
            ArgType::S8 => "s8",
            ArgType::U16 => "u16",
            ArgType::S16 => "s16",
            ArgType::S16V => "s16V",
            ArgType::Float => "float",
        }
    }

    /// Encoded width on the wire.
    pub fn width(self) -> usize {
        match self {
            ArgType::Void => 0,
            ArgType::U8 | ArgType::S8 => 1,
            ArgType::U16 | ArgType::S16 | ArgType::S16V => 2,
            ArgType::Float => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandDescriptor {
    pub name: &'static str,
    pub command: u8,
    pub args: &'static [ArgType],
    pub returns: ArgType,
}

impl CommandDescriptor {
    pub fn arg_count(&self) -> usize {
        self.args.len()
    }

    pub fn is_query(&self) -> bool {
        self.returns != ArgType::Void
    }

    /// Human-readable form, e.g. `play_note(s16V, s16V)`.
    pub fn signature(&self) -> String {
        let args: Vec<&str> = self.args.iter().map(|a| a.name()).collect();
        let mut sig = format!("{}({})", self.name, args.join(", "));
        if self.is_query() {
            sig.push_str(" -> ");
            sig.push_str(self.returns.name());
        }
        sig
    }
}

#[derive(Debug)]
pub struct PeerModule {
    pub name: &'static str,
    pub address: u8,
    pub commands: &'static [CommandDescriptor],
}

const fn cmd(
    name: &'static str,
    command: u8,
    args: &'static [ArgType],
    returns: ArgType,
) -> CommandDescriptor {
    CommandDescriptor {
        name,
        command,
        args,
        returns,
    }
}

use self::ArgType::{Float, S16, S16V, S8, Void};

// ── Peer tables ──────────────────────────────────────────────────────────────

const JUST_FRIENDS: &[CommandDescriptor] = &[
    cmd("trigger", 0x01, &[S8, S8], Void),
    cmd("run_mode", 0x02, &[S8], Void),
    cmd("run", 0x03, &[S16V], Void),
    cmd("transpose", 0x04, &[S16V], Void),
    cmd("vtrigger", 0x05, &[S8, S16V], Void),
    cmd("mode", 0x06, &[S8], Void),
    cmd("tick", 0x07, &[S8], Void),
    cmd("play_voice", 0x08, &[S8, S16V, S16V], Void),
    cmd("play_note", 0x09, &[S16V, S16V], Void),
    cmd("god_mode", 0x0A, &[S8], Void),
    cmd("retune", 0x0B, &[S8, S8, S8], Void),
    cmd("quantize", 0x0C, &[S8], Void),
    cmd("get_trigger", 0x81, &[S8], S8),
    cmd("get_run_mode", 0x82, &[], S8),
    cmd("get_run", 0x83, &[], S16V),
    cmd("get_mode", 0x86, &[], S8),
];

const SCRIPT_MODULE: &[CommandDescriptor] = &[
    cmd("volts", 0x01, &[S8, S16V], Void),
    cmd("slew", 0x02, &[S8, S16], Void),
    cmd("reset", 0x03, &[], Void),
    cmd("pulse", 0x04, &[S8, S16, S16V, S8], Void),
    cmd("ar", 0x05, &[S8, S16, S16, S16V], Void),
    cmd("lfo", 0x06, &[S8, S16V, S16V, S16V], Void),
    cmd("call1", 0x07, &[Float], Void),
    cmd("call2", 0x08, &[Float, Float], Void),
    cmd("call3", 0x09, &[Float, Float, Float], Void),
    cmd("get_input", 0x80, &[S8], S16V),
    cmd("get_output", 0x81, &[S8], S16V),
    cmd("query0", 0x82, &[], Float),
];

const ER_301: &[CommandDescriptor] = &[
    cmd("tr", 0x00, &[S16, S16], Void),
    cmd("tr_tog", 0x01, &[S16], Void),
    cmd("tr_pulse", 0x05, &[S16], Void),
    cmd("tr_time", 0x06, &[S16, S16], Void),
    cmd("tr_pol", 0x07, &[S16, S16], Void),
    cmd("cv", 0x10, &[S16, S16V], Void),
    cmd("cv_set", 0x11, &[S16, S16V], Void),
    cmd("cv_slew", 0x12, &[S16, S16], Void),
    cmd("cv_off", 0x15, &[S16, S16V], Void),
];

pub const MODULES: &[PeerModule] = &[
    PeerModule {
        name: "just friends",
        address: 0x70,
        commands: JUST_FRIENDS,
    },
    PeerModule {
        name: "script module",
        address: 0x01,
        commands: SCRIPT_MODULE,
    },
    PeerModule {
        name: "er-301",
        address: 0x31,
        commands: ER_301,
    },
];

// ── Lookup ───────────────────────────────────────────────────────────────────

pub fn find_module(address: u8) -> Option<&'static PeerModule> {
    MODULES.iter().find(|m| m.address == address)
}

pub fn find_command(address: u8, command: u8) -> Option<&'static CommandDescriptor> {
    find_module(address)?
        .commands
        .iter()
        .find(|c| c.command == command)
}

/// Command names for one peer; empty for an unknown address.
pub fn list_commands(address: u8) -> Vec<&'static str> {
    find_module(address)
        .map(|m| m.commands.iter().map(|c| c.name).collect())
        .unwrap_or_default()
}

pub fn module_list() -> String {
    MODULES
        .iter()
        .map(|m| format!("{} ({:#04x})", m.name, m.address))
        .collect::<Vec<_>>()
        .join(", ")
}
