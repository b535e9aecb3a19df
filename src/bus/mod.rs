/// `bus/` - inter-module bus protocol layer
///
/// The command table is compiled in. Scripts never read it directly; the
/// `send_ii` capability goes through `codec::encode`, which rejects anything
/// the table does not describe.
pub mod codec;
pub mod commands;

pub use commands::{find_command, list_commands, module_list, ArgType, CommandDescriptor};
