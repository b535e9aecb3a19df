/// `link/control.rs` - out-of-band control tokens on the inbound host link
///
/// A line that starts with `^^` is a command to the bridge itself rather
/// than script text. Anything else is handed to the reception state machine.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostCommand {
    /// `^^s` - begin receiving a new user script.
    StartReception,
    /// `^^e` - end of transfer: test, then save.
    EndReception,
    /// `^^p` - send the stored user script back.
    PrintScript,
    /// `^^r` - soft reset: rebuild the engine and reload the startup script.
    Reset,
    /// `^^b` - jump to the firmware updater.
    Bootloader,
    /// `^^v` - report the bridge version.
    Version,
}

const PREFIX: &[u8] = b"^^";

impl HostCommand {
    pub fn token(self) -> &'static str {
        match self {
            HostCommand::StartReception => "^^s",
            HostCommand::EndReception => "^^e",
            HostCommand::PrintScript => "^^p",
            HostCommand::Reset => "^^r",
            HostCommand::Bootloader => "^^b",
            HostCommand::Version => "^^v",
        }
    }

    /// Recognise a control token. Trailing whitespace is ignored; longer
    /// spellings such as `^^startupload` match on their first letter.
    pub fn parse(line: &[u8]) -> Option<HostCommand> {
        let line = line.trim_ascii();
        let rest = line.strip_prefix(PREFIX)?;
        match rest.first()? {
            b's' => Some(HostCommand::StartReception),
            b'e' => Some(HostCommand::EndReception),
            b'p' => Some(HostCommand::PrintScript),
            b'r' => Some(HostCommand::Reset),
            b'b' => Some(HostCommand::Bootloader),
            b'v' => Some(HostCommand::Version),
            _ => None,
        }
    }
}
