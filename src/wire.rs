//! Gossip wire framing: a 12-byte zero-padded command name followed by a
//! self-describing payload. One TCP connection carries exactly one message.

use serde::{Deserialize, Serialize};

pub const COMMAND_LENGTH: usize = 12;
pub const PROTOCOL_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvKind {
    Block,
    Tx,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct VersionPayload {
    pub version: i32,
    pub best_height: u64,
    pub addr_from: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetBlocksPayload {
    pub addr_from: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct InvPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub items: Vec<Vec<u8>>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetDataPayload {
    pub addr_from: String,
    pub kind: InvKind,
    pub id: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BlockPayload {
    pub addr_from: String,
    pub block: Vec<u8>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TxPayload {
    pub addr_from: String,
    pub tx: Vec<u8>,
}

/// Zero-pads (or truncates) a command name into the fixed-width field.
#[must_use]
pub fn command_to_bytes(command: &str) -> [u8; COMMAND_LENGTH] {
    let mut bytes = [0u8; COMMAND_LENGTH];
    let src = command.as_bytes();
    let len = src.len().min(COMMAND_LENGTH);
    bytes[..len].copy_from_slice(&src[..len]);
    bytes
}

/// Trims the trailing zero padding back to a plain command name.
#[must_use]
pub fn bytes_to_command(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Builds a full on-wire message: command prefix followed by the
/// bincode-serialized payload.
///
/// # Errors
///
/// Returns an error if `payload` fails to serialize.
pub fn encode<T: Serialize>(command: &str, payload: &T) -> bincode::Result<Vec<u8>> {
    let mut out = command_to_bytes(command).to_vec();
    out.extend(bincode::serialize(payload)?);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_round_trips() {
        let bytes = command_to_bytes("version");
        assert_eq!(bytes_to_command(&bytes), "version");
    }

    #[test]
    fn long_command_name_truncates() {
        let bytes = command_to_bytes("a-very-long-command-name");
        assert_eq!(bytes.len(), COMMAND_LENGTH);
    }

    #[test]
    fn encode_prefixes_command_then_payload() {
        let payload = GetBlocksPayload {
            addr_from: "127.0.0.1:3000".to_string(),
        };
        let msg = encode("getblocks", &payload).unwrap();
        assert_eq!(bytes_to_command(&msg[..COMMAND_LENGTH]), "getblocks");
    }
}
