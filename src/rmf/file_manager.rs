//! File manager: tracks local and remote files by address, publishes,
//! opens, and routes writes (spec §4.6). All operations are mutex-guarded;
//! no lock is held across a caller callback (spec §5's "no lock held
//! across a user callback").

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::error::{ApxResult, ErrorKind};
use crate::rmf::command::{Command, FileInfo, FileOpen};
use crate::rmf::file::{File, FileState};

/// Maximum bytes per data-frame chunk when streaming a file's initial contents (spec §4.6).
pub const CHUNK_SIZE: usize = 256;

/// A frame the caller (the connection driver) should transmit as a result
/// of a file-manager operation. Kept decoupled from the connection type so
/// the file manager never needs a back-reference to its owning connection
/// (spec §9 "cyclic ownership" design note).
#[derive(Debug)]
pub enum OutboundFrame {
    Command(Command),
    Data { address: u32, more: bool, bytes: Vec<u8> },
}

pub struct FileManager {
    local: Mutex<Vec<File>>,
    remote: Mutex<Vec<File>>,
    greeting_accepted: AtomicBool,
}

impl Default for FileManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FileManager {
    pub fn new() -> Self {
        Self {
            local: Mutex::new(Vec::new()),
            remote: Mutex::new(Vec::new()),
            greeting_accepted: AtomicBool::new(false),
        }
    }

    pub fn set_greeting_accepted(&self, accepted: bool) {
        self.greeting_accepted.store(accepted, Ordering::SeqCst);
    }

    /// Insert `file` into the local map. If the greeting has already been
    /// accepted, immediately returns a `FILE_INFO` frame to transmit.
    pub fn attach_local_file(&self, file: File) -> ApxResult<Vec<OutboundFrame>> {
        let info_frame = if self.greeting_accepted.load(Ordering::SeqCst) {
            Some(OutboundFrame::Command(Command::FileInfo(FileInfo {
                address: file.address,
                size: file.size,
                file_type: file.file_type,
                digest_type: file.digest_type,
                digest: file.digest.clone(),
                name: file.name.clone(),
            })))
        } else {
            None
        };
        self.local.lock().expect("local file map mutex poisoned").push(file);
        Ok(info_frame.into_iter().collect())
    }

    /// Record a peer's published file. Returns a snapshot of the inserted
    /// file's publish attributes so the caller (connection/routing layer)
    /// can decide whether to request it be opened.
    pub fn on_remote_file_info(&self, info: FileInfo) -> ApxResult<FileInfo> {
        let file = File::new(
            info.name.clone(),
            info.address,
            vec![0u8; info.size as usize],
            info.file_type,
        );
        self.remote.lock().expect("remote file map mutex poisoned").push(file);
        Ok(info)
    }

    /// Give a file published by the peer a local writable buffer and
    /// write-handler, without re-publishing it (no `FILE_INFO` is emitted).
    /// Used once a remote file is opened: subsequent data frames addressed
    /// to it are located in the local map, per `message_received`'s
    /// "locate local file by address range" rule (spec §4.6) — this is the
    /// mechanism that makes that rule work for files *we* did not publish.
    pub fn adopt_remote_file_as_local(
        &self,
        name: impl Into<String>,
        address: u32,
        size: u32,
        file_type: crate::rmf::command::FileType,
        handler: Box<dyn Fn(u32, &[u8]) -> ApxResult<()> + Send + Sync>,
    ) -> ApxResult<()> {
        let mut file = File::new(name, address, vec![0u8; size as usize], file_type);
        file.state = FileState::Open;
        file.write_handler = Some(handler);
        self.local.lock().expect("local file map mutex poisoned").push(file);
        Ok(())
    }

    /// Emit `FILE_OPEN` for a remote file and mark it "opening".
    pub fn request_open(&self, address: u32) -> ApxResult<Vec<OutboundFrame>> {
        let mut remote = self.remote.lock().expect("remote file map mutex poisoned");
        let file = remote
            .iter_mut()
            .find(|f| f.address == address)
            .ok_or_else(|| ErrorKind::NotFound(format!("remote file at {:#x}", address)))?;
        file.state = FileState::Opening;
        Ok(vec![OutboundFrame::Command(Command::FileOpen(FileOpen { address }))])
    }

    /// A peer requested one of our local files be opened: mark it open and
    /// stream its initial contents as one or more data frames, chunked at
    /// `CHUNK_SIZE` bytes with the more-bit set on every chunk but the last.
    pub fn on_open_request(&self, address: u32) -> ApxResult<Vec<OutboundFrame>> {
        let mut local = self.local.lock().expect("local file map mutex poisoned");
        let file = local
            .iter_mut()
            .find(|f| f.address == address)
            .ok_or_else(|| ErrorKind::NotFound(format!("local file at {:#x}", address)))?;
        file.state = FileState::Open;

        let chunks: Vec<&[u8]> = file.contents.chunks(CHUNK_SIZE).collect();
        let mut frames = Vec::with_capacity(chunks.len().max(1));
        for (i, chunk) in chunks.iter().enumerate() {
            let more = i + 1 < chunks.len();
            frames.push(OutboundFrame::Data {
                address: file.address + (i * CHUNK_SIZE) as u32,
                more,
                bytes: chunk.to_vec(),
            });
        }
        Ok(frames)
    }

    /// Dispatch a received frame: command address routes to command
    /// handling, any other address is a data write located by range in the
    /// local file map. The second tuple element carries a freshly-recorded
    /// remote `FILE_INFO` back to the caller (the connection driver), which
    /// holds the signature-map context needed to decide whether any local
    /// require-port wants this file opened — that decision does not belong
    /// in the file manager itself.
    pub fn message_received(
        &self,
        write_address: u32,
        payload: &[u8],
    ) -> ApxResult<(Vec<OutboundFrame>, Option<FileInfo>)> {
        if crate::rmf::address::is_command_address(write_address) {
            let command = Command::decode(payload)?;
            match command {
                Command::FileInfo(info) => {
                    let recorded = self.on_remote_file_info(info)?;
                    Ok((vec![], Some(recorded)))
                }
                Command::FileOpen(open) => Ok((self.on_open_request(open.address)?, None)),
                Command::FileClose(close) => {
                    self.close_file(close.address);
                    Ok((vec![], None))
                }
                Command::Ack | Command::Heartbeat => Ok((vec![], None)),
            }
        } else {
            self.write_data(write_address, payload)?;
            Ok((vec![], None))
        }
    }

    fn write_data(&self, address: u32, bytes: &[u8]) -> ApxResult<()> {
        let mut local = self.local.lock().expect("local file map mutex poisoned");
        let file = local
            .iter_mut()
            .find(|f| f.contains(address))
            .ok_or_else(|| ErrorKind::NotFound(format!("local file containing address {:#x}", address)))?;
        let offset = (address - file.address) as usize;
        file.write_at(offset, bytes)
    }

    fn close_file(&self, address: u32) {
        self.local.lock().expect("local file map mutex poisoned").retain(|f| f.address != address);
        self.remote.lock().expect("remote file map mutex poisoned").retain(|f| f.address != address);
    }

    pub fn local_file_count(&self) -> usize {
        self.local.lock().expect("local file map mutex poisoned").len()
    }

    pub fn remote_file_count(&self) -> usize {
        self.remote.lock().expect("remote file map mutex poisoned").len()
    }

    pub fn set_local_write_handler(
        &self,
        address: u32,
        handler: Box<dyn Fn(u32, &[u8]) -> ApxResult<()> + Send + Sync>,
    ) -> ApxResult<()> {
        let mut local = self.local.lock().expect("local file map mutex poisoned");
        let file = local
            .iter_mut()
            .find(|f| f.address == address)
            .ok_or_else(|| ErrorKind::NotFound(format!("local file at {:#x}", address)))?;
        file.write_handler = Some(handler);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rmf::command::FileType;

    #[test]
    fn attach_before_greeting_emits_no_frame() {
        let fm = FileManager::new();
        let file = File::new("X.out", 0, vec![0xFF; 4], FileType::Fixed);
        let frames = fm.attach_local_file(file).unwrap();
        assert!(frames.is_empty());
        assert_eq!(fm.local_file_count(), 1);
    }

    #[test]
    fn attach_after_greeting_emits_file_info() {
        let fm = FileManager::new();
        fm.set_greeting_accepted(true);
        let file = File::new("X.out", 0, vec![0xFF; 4], FileType::Fixed);
        let frames = fm.attach_local_file(file).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], OutboundFrame::Command(Command::FileInfo(_))));
    }

    #[test]
    fn publish_then_open_streams_initial_contents() {
        let fm = FileManager::new();
        let file = File::new("TestNode.out", 0, vec![0xFF; 4], FileType::Fixed);
        fm.attach_local_file(file).unwrap();
        let frames = fm.on_open_request(0).unwrap();
        assert_eq!(frames.len(), 1);
        match &frames[0] {
            OutboundFrame::Data { address, more, bytes } => {
                assert_eq!(*address, 0);
                assert!(!more);
                assert_eq!(bytes, &vec![0xFF; 4]);
            }
            _ => panic!("expected data frame"),
        }
    }

    #[test]
    fn large_file_chunks_with_more_bit_except_last() {
        let fm = FileManager::new();
        let file = File::new("Big.out", 0, vec![0xAAu8; 300], FileType::Fixed);
        fm.attach_local_file(file).unwrap();
        let frames = fm.on_open_request(0).unwrap();
        assert_eq!(frames.len(), 2);
        match &frames[0] {
            OutboundFrame::Data { more, bytes, .. } => {
                assert!(*more);
                assert_eq!(bytes.len(), CHUNK_SIZE);
            }
            _ => panic!(),
        }
        match &frames[1] {
            OutboundFrame::Data { more, bytes, .. } => {
                assert!(!more);
                assert_eq!(bytes.len(), 44);
            }
            _ => panic!(),
        }
    }

    #[test]
    fn data_write_locates_file_by_range_and_invokes_handler() {
        use std::sync::atomic::{AtomicBool, Ordering};
        use std::sync::Arc;

        let fm = FileManager::new();
        let mut file = File::new("In.in", 100, vec![0u8; 4], FileType::Fixed);
        let fired = Arc::new(AtomicBool::new(false));
        let fired2 = fired.clone();
        file.write_handler = Some(Box::new(move |_addr, _bytes| {
            fired2.store(true, Ordering::SeqCst);
            Ok(())
        }));
        fm.local.lock().unwrap().push(file);
        fm.message_received(102, &[0x12, 0x34]).unwrap();
        assert!(fired.load(Ordering::SeqCst));
    }

    #[test]
    fn adopted_remote_file_routes_incoming_data_to_handler() {
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::sync::Arc;

        let fm = FileManager::new();
        let seen = Arc::new(AtomicU32::new(0));
        let seen2 = seen.clone();
        fm.adopt_remote_file_as_local(
            "VehicleSpeed.out",
            200,
            4,
            FileType::Fixed,
            Box::new(move |addr, _bytes| {
                seen2.store(addr, Ordering::SeqCst);
                Ok(())
            }),
        )
        .unwrap();
        fm.message_received(202, &[0xAA, 0xBB]).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 202);
    }

    #[test]
    fn remote_file_info_then_request_open() {
        let fm = FileManager::new();
        let info = FileInfo {
            address: 0,
            size: 4,
            file_type: FileType::Fixed,
            digest_type: 0,
            digest: vec![],
            name: "Peer.out".into(),
        };
        fm.on_remote_file_info(info).unwrap();
        assert_eq!(fm.remote_file_count(), 1);
        let frames = fm.request_open(0).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(matches!(frames[0], OutboundFrame::Command(Command::FileOpen(_))));
    }
}
