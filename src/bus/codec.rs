/// `bus/codec.rs` - command framing for the inter-module bus
///
/// Frames are `[command, args...]` with multi-byte values big-endian.
use super::commands::{find_command, ArgType, CommandDescriptor};
use crate::error::{BridgeError, BridgeResult};

/// Counts per volt for `s16V` values (16384 == 10 V).
pub const COUNTS_PER_VOLT: f32 = 1638.4;

pub fn encode(address: u8, command: u8, args: &[f32]) -> BridgeResult<Vec<u8>> {
    let descriptor =
        find_command(address, command).ok_or(BridgeError::UnknownBusCommand { address, command })?;
    encode_with(descriptor, args)
}

pub fn encode_with(descriptor: &CommandDescriptor, args: &[f32]) -> BridgeResult<Vec<u8>> {
    if args.len() != descriptor.arg_count() {
        return Err(BridgeError::BusArgument(format!(
            "{} takes {} argument(s), got {}",
            descriptor.signature(),
            descriptor.arg_count(),
            args.len()
        )));
    }

    let width: usize = descriptor.args.iter().map(|a| a.width()).sum();
    let mut frame = Vec::with_capacity(1 + width);
    frame.push(descriptor.command);
    for (ty, value) in descriptor.args.iter().zip(args) {
        if !value.is_finite() {
            return Err(BridgeError::BusArgument(format!(
                "{}: non-finite argument",
                descriptor.name
            )));
        }
        put_value(&mut frame, *ty, *value);
    }
    Ok(frame)
}

/// Decode a reply to a query command. `void` commands have no reply value.
pub fn decode_response(descriptor: &CommandDescriptor, bytes: &[u8]) -> BridgeResult<Option<f32>> {
    let ty = descriptor.returns;
    if ty == ArgType::Void {
        return Ok(None);
    }
    if bytes.len() < ty.width() {
        return Err(BridgeError::BusArgument(format!(
            "{}: reply has {} byte(s), expected {}",
            descriptor.name,
            bytes.len(),
            ty.width()
        )));
    }
    let value = match ty {
        ArgType::Void => return Ok(None),
        ArgType::U8 => bytes[0] as f32,
        ArgType::S8 => bytes[0] as i8 as f32,
        ArgType::U16 => u16::from_be_bytes([bytes[0], bytes[1]]) as f32,
        ArgType::S16 => i16::from_be_bytes([bytes[0], bytes[1]]) as f32,
        ArgType::S16V => i16::from_be_bytes([bytes[0], bytes[1]]) as f32 / COUNTS_PER_VOLT,
        ArgType::Float => f32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
    };
    Ok(Some(value))
}

// Float-to-int `as` casts saturate, which is the clamping we want on the wire.
fn put_value(frame: &mut Vec<u8>, ty: ArgType, value: f32) {
    match ty {
        ArgType::Void => {}
        ArgType::U8 => frame.push(value.round() as u8),
        ArgType::S8 => frame.push(value.round() as i8 as u8),
        ArgType::U16 => frame.extend_from_slice(&(value.round() as u16).to_be_bytes()),
        ArgType::S16 => frame.extend_from_slice(&(value.round() as i16).to_be_bytes()),
        ArgType::S16V => {
            frame.extend_from_slice(&((value * COUNTS_PER_VOLT).round() as i16).to_be_bytes())
        }
        ArgType::Float => frame.extend_from_slice(&value.to_be_bytes()),
    }
}
