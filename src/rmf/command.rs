//! RMF command frame bodies (spec §4.5). A command frame's write address is
//! always `CMD_AREA_START_ADDRESS`; the payload starts with a little-endian
//! 32-bit command type followed by a type-specific body. All multi-byte
//! integers inside payloads are little-endian (spec §6); only RMF addresses
//! on the wire are big-endian.

use crate::error::{ApxResult, ErrorKind};

/// The literal 8-byte ACK payload sent in response to a greeting (spec §4.5/§4.7).
pub const ACK_PAYLOAD: [u8; 8] = [0xBF, 0xFF, 0xFC, 0x00, 0x00, 0x00, 0x00, 0x00];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CommandType {
    FileInfo = 0,
    FileOpen = 1,
    FileClose = 2,
    Ack = 3,
    Heartbeat = 4,
}

impl TryFrom<u32> for CommandType {
    type Error = ErrorKind;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Ok(match value {
            0 => CommandType::FileInfo,
            1 => CommandType::FileOpen,
            2 => CommandType::FileClose,
            3 => CommandType::Ack,
            4 => CommandType::Heartbeat,
            other => return Err(ErrorKind::InvalidArgument(format!("unknown command type {}", other))),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Fixed,
    Dynamic,
}

/// `FILE_INFO` command body: publishes a file at a given address (spec §4.5/§4.6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub address: u32,
    pub size: u32,
    pub file_type: FileType,
    pub digest_type: u8,
    pub digest: Vec<u8>,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileOpen {
    pub address: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileClose {
    pub address: u32,
}

/// A fully-typed command frame body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    FileInfo(FileInfo),
    FileOpen(FileOpen),
    FileClose(FileClose),
    Ack,
    Heartbeat,
}

impl Command {
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::FileInfo(_) => CommandType::FileInfo,
            Command::FileOpen(_) => CommandType::FileOpen,
            Command::FileClose(_) => CommandType::FileClose,
            Command::Ack => CommandType::Ack,
            Command::Heartbeat => CommandType::Heartbeat,
        }
    }

    /// Encode the command-type word plus body into `out`. `Ack` is the one
    /// exception: it is always the literal 8-byte `ACK_PAYLOAD` with no
    /// type-word prefix (spec §4.5/§4.7), not `Ack`'s `CommandType` word
    /// followed by a body.
    pub fn encode(&self, out: &mut Vec<u8>) -> ApxResult<()> {
        if let Command::Ack = self {
            out.extend_from_slice(&ACK_PAYLOAD);
            return Ok(());
        }
        out.extend_from_slice(&(self.command_type() as u32).to_le_bytes());
        match self {
            Command::FileInfo(info) => {
                if info.name.as_bytes().len() > 256 {
                    return Err(ErrorKind::NameTooLong(info.name.clone()));
                }
                out.extend_from_slice(&info.address.to_le_bytes());
                out.extend_from_slice(&info.size.to_le_bytes());
                out.push(match info.file_type {
                    FileType::Fixed => 0,
                    FileType::Dynamic => 1,
                });
                out.push(info.digest_type);
                out.extend_from_slice(&(info.digest.len() as u32).to_le_bytes());
                out.extend_from_slice(&info.digest);
                out.extend_from_slice(info.name.as_bytes());
                out.push(0);
            }
            Command::FileOpen(open) => out.extend_from_slice(&open.address.to_le_bytes()),
            Command::FileClose(close) => out.extend_from_slice(&close.address.to_le_bytes()),
            Command::Ack => unreachable!("handled above"),
            Command::Heartbeat => {}
        }
        Ok(())
    }

    /// Decode a command frame body. `Ack` is recognized from its literal 8-byte
    /// payload rather than from the command-type word, matching the greeting
    /// handshake's detection rule (spec §4.7): an 8-byte frame with payload
    /// `ACK_PAYLOAD` is always the ACK regardless of framing stage.
    pub fn decode(buf: &[u8]) -> ApxResult<Command> {
        if buf.len() == 8 && buf == ACK_PAYLOAD {
            return Ok(Command::Ack);
        }
        let type_word = u32::from_le_bytes(
            buf.get(0..4)
                .ok_or(ErrorKind::UnexpectedEnd)?
                .try_into()
                .unwrap(),
        );
        let command_type = CommandType::try_from(type_word)?;
        let body = &buf[4..];
        Ok(match command_type {
            CommandType::FileInfo => {
                let address = read_u32(body, 0)?;
                let size = read_u32(body, 4)?;
                let file_type = match *body.get(8).ok_or(ErrorKind::UnexpectedEnd)? {
                    0 => FileType::Fixed,
                    1 => FileType::Dynamic,
                    other => return Err(ErrorKind::InvalidArgument(format!("unknown file type {}", other))),
                };
                let digest_type = *body.get(9).ok_or(ErrorKind::UnexpectedEnd)?;
                let digest_len = read_u32(body, 10)? as usize;
                let digest_start = 14;
                let digest = body
                    .get(digest_start..digest_start + digest_len)
                    .ok_or(ErrorKind::UnexpectedEnd)?
                    .to_vec();
                let name_bytes = &body[digest_start + digest_len..];
                // Older peers may omit the trailing NUL (spec §4.5/§9); accept both.
                let name_bytes = match name_bytes.iter().position(|&b| b == 0) {
                    Some(pos) => &name_bytes[..pos],
                    None => name_bytes,
                };
                let name = String::from_utf8(name_bytes.to_vec())
                    .map_err(|_| ErrorKind::InvalidArgument("file name is not valid UTF-8".into()))?;
                if name.as_bytes().len() > 256 {
                    return Err(ErrorKind::NameTooLong(name));
                }
                Command::FileInfo(FileInfo {
                    address,
                    size,
                    file_type,
                    digest_type,
                    digest,
                    name,
                })
            }
            CommandType::FileOpen => Command::FileOpen(FileOpen {
                address: read_u32(body, 0)?,
            }),
            CommandType::FileClose => Command::FileClose(FileClose {
                address: read_u32(body, 0)?,
            }),
            CommandType::Ack => Command::Ack,
            CommandType::Heartbeat => Command::Heartbeat,
        })
    }
}

fn read_u32(buf: &[u8], offset: usize) -> ApxResult<u32> {
    let bytes = buf.get(offset..offset + 4).ok_or(ErrorKind::UnexpectedEnd)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

/// Legacy greeting: `RMFP/1.0\nNumHeader-Format:32\n\n`.
pub const GREETING_LEGACY: &str = "RMFP/1.0\nNumHeader-Format:32\n\n";
/// Current greeting: `RMFP/1.0\nMessage-Format: 32\n\n`.
pub const GREETING_CURRENT: &str = "RMFP/1.0\nMessage-Format: 32\n\n";

/// True if `text` is one of the two recognized greeting formats (spec §4.5).
pub fn is_valid_greeting(text: &str) -> bool {
    text == GREETING_LEGACY || text == GREETING_CURRENT
}
