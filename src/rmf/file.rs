//! RMF file: a named byte region at a fixed address (spec §3/§4.6).
//! Represents a port-data aggregate (`.out`/`.in`) or a definition text
//! (`.apx`) published into the shared address space.

use crate::error::{ApxResult, ErrorKind};
use crate::rmf::command::FileType;

/// Lifecycle state of a file as tracked by the local `FileManager` (spec §3 "Lifecycles").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileState {
    Created,
    Opening,
    Open,
}

/// A byte-addressed file, local or remote.
///
/// `write_handler` fires when bytes land in this file via
/// `FileManager::message_received` — for a require-port `.in` file this is
/// typically a closure that writes into the owning `NodeInstance`'s
/// require-port buffer.
pub struct File {
    pub name: String,
    pub address: u32,
    pub size: u32,
    pub file_type: FileType,
    pub digest_type: u8,
    pub digest: Vec<u8>,
    pub state: FileState,
    pub contents: Vec<u8>,
    pub write_handler: Option<Box<dyn Fn(u32, &[u8]) -> ApxResult<()> + Send + Sync>>,
}

impl std::fmt::Debug for File {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("File")
            .field("name", &self.name)
            .field("address", &self.address)
            .field("size", &self.size)
            .field("file_type", &self.file_type)
            .field("state", &self.state)
            .field("has_write_handler", &self.write_handler.is_some())
            .finish()
    }
}

impl File {
    pub fn new(name: impl Into<String>, address: u32, contents: Vec<u8>, file_type: FileType) -> Self {
        let size = contents.len() as u32;
        Self {
            name: name.into(),
            address,
            size,
            file_type,
            digest_type: 0,
            digest: Vec::new(),
            state: FileState::Created,
            contents,
            write_handler: None,
        }
    }

    /// True if `address` falls within this file's byte range.
    pub fn contains(&self, address: u32) -> bool {
        address >= self.address && address < self.address.saturating_add(self.size)
    }

    /// Write `bytes` at `offset` within this file's contents, then invoke
    /// the write-handler (if any) with the absolute address and the bytes written.
    pub fn write_at(&mut self, offset: usize, bytes: &[u8]) -> ApxResult<()> {
        let end = offset
            .checked_add(bytes.len())
            .ok_or(ErrorKind::Memory)?;
        if end > self.contents.len() {
            return Err(ErrorKind::MsgTooLarge {
                size: end,
                max: self.contents.len(),
            });
        }
        self.contents[offset..end].copy_from_slice(bytes);
        if let Some(handler) = &self.write_handler {
            handler(self.address + offset as u32, bytes)?;
        }
        Ok(())
    }
}
