//! Connection: drives the greeting handshake, frame parsing, and
//! send-buffer batching over a `ByteStreamEndpoint` (spec §4.7). Generic
//! over the transport so the same driver runs on TCP or Unix domain
//! sockets, matching the teacher's accept-loop/worker split in
//! `ipc/tcp_socket.rs` and `ipc/unix_domain_socket.rs`.

pub mod state;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::error::{ApxResult, ErrorKind};
use crate::model::node::NodeInstance;
use crate::routing::SignatureMap;
use crate::rmf::command::{self, Command, FileInfo};
use crate::rmf::file::File as RmfFile;
use crate::rmf::file_manager::{FileManager, OutboundFrame};
use crate::rmf::{address, command::FileType, numheader};
use crate::transport::ByteStreamEndpoint;

pub use state::{ConnectionEvent, ConnectionState, Role};

/// Default send-buffer size (spec §4.7).
pub const DEFAULT_SEND_BUFFER_SIZE: usize = 4096;

/// A single RMF connection: one socket, one greeting handshake, one set of
/// published node instances.
pub struct Connection<T: ByteStreamEndpoint> {
    role: Role,
    state: ConnectionState,
    endpoint: T,
    send_buffer: Vec<u8>,
    send_buffer_cap: usize,
    read_buf: Vec<u8>,
    file_manager: Arc<FileManager>,
    signature_map: Arc<SignatureMap>,
    node_instances: Vec<Arc<NodeInstance>>,
    next_port_address: u32,
    next_definition_address: u32,
}

impl<T: ByteStreamEndpoint> Connection<T> {
    pub fn new(endpoint: T, role: Role, signature_map: Arc<SignatureMap>) -> Self {
        Self {
            role,
            state: ConnectionState::Init,
            endpoint,
            send_buffer: Vec::with_capacity(DEFAULT_SEND_BUFFER_SIZE),
            send_buffer_cap: DEFAULT_SEND_BUFFER_SIZE,
            read_buf: Vec::new(),
            file_manager: Arc::new(FileManager::new()),
            signature_map,
            node_instances: Vec::new(),
            next_port_address: address::PORT_DATA_START,
            next_definition_address: address::DEFINITION_START,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn file_manager(&self) -> &Arc<FileManager> {
        &self.file_manager
    }

    /// Register a node instance: its ports are attached to the shared
    /// signature map immediately (spec §3's signature-map entry lifecycle),
    /// and its `.out`/`.apx` files are published once the handshake reaches
    /// `ACTIVE` (spec §4.7).
    pub fn register_node_instance(&mut self, node: Arc<NodeInstance>) {
        for (index, port) in node.provide_ports.iter().enumerate() {
            self.signature_map
                .attach_provide_port(&port.port_signature, crate::routing::PortBinding::new(node.clone(), index));
        }
        for (index, port) in node.require_ports.iter().enumerate() {
            self.signature_map
                .attach_require_port(&port.port_signature, crate::routing::PortBinding::new(node.clone(), index));
        }
        self.node_instances.push(node);
    }

    fn apply_event(&mut self, event: ConnectionEvent) -> ApxResult<()> {
        self.state = self.state.transition(event)?;
        Ok(())
    }

    /// Bytes still available in the current send batch (spec §5's
    /// "current_bytes_available" backpressure hook).
    pub fn current_bytes_available(&self) -> usize {
        self.send_buffer_cap.saturating_sub(self.send_buffer.len())
    }

    pub fn transmit_begin(&mut self) {
        // Buffer is flushed eagerly by `queue_frame`/`transmit_end`; nothing
        // to reset here beyond documenting the batch boundary.
    }

    /// Queue one NumHeader-framed message for the current batch, flushing
    /// synchronously first if it would not fit (spec §4.7).
    pub async fn queue_frame(&mut self, payload: &[u8]) -> ApxResult<()> {
        let mut framed = Vec::with_capacity(payload.len() + 4);
        numheader::encode(payload.len() as u32, &mut framed)?;
        framed.extend_from_slice(payload);
        if framed.len() > self.send_buffer_cap {
            return Err(ErrorKind::MsgTooLarge {
                size: framed.len(),
                max: self.send_buffer_cap,
            });
        }
        if self.send_buffer.len() + framed.len() > self.send_buffer_cap {
            self.flush().await?;
        }
        self.send_buffer.extend_from_slice(&framed);
        Ok(())
    }

    pub async fn transmit_end(&mut self) -> ApxResult<()> {
        self.flush().await
    }

    async fn flush(&mut self) -> ApxResult<()> {
        if self.send_buffer.is_empty() {
            return Ok(());
        }
        self.endpoint.write_all(&self.send_buffer).await?;
        self.send_buffer.clear();
        Ok(())
    }

    async fn send_command(&mut self, command: Command) -> ApxResult<()> {
        let mut payload = Vec::new();
        address::encode(address::CMD_AREA_START_ADDRESS, false, &mut payload)?;
        command.encode(&mut payload)?;
        self.transmit_begin();
        self.queue_frame(&payload).await?;
        self.transmit_end().await
    }

    async fn send_data(&mut self, addr: u32, more: bool, bytes: &[u8]) -> ApxResult<()> {
        let mut payload = Vec::new();
        address::encode(addr, more, &mut payload)?;
        payload.extend_from_slice(bytes);
        self.transmit_begin();
        self.queue_frame(&payload).await?;
        self.transmit_end().await
    }

    /// Send the literal 8-byte ACK frame with no address prefix (spec
    /// §4.5/§4.7): unlike every other command, the ACK is not addressed to
    /// `CMD_AREA_START_ADDRESS` on the wire, so it must bypass
    /// `send_command`'s automatic address encoding — the peer's handshake
    /// reads it back as a raw `ACK_PAYLOAD`-length frame, not an
    /// address-decodable one.
    async fn send_ack(&mut self) -> ApxResult<()> {
        self.transmit_begin();
        self.queue_frame(&command::ACK_PAYLOAD).await?;
        self.transmit_end().await
    }

    async fn send_outbound(&mut self, frame: OutboundFrame) -> ApxResult<()> {
        match frame {
            OutboundFrame::Command(c) => self.send_command(c).await,
            OutboundFrame::Data { address, more, bytes } => self.send_data(address, more, &bytes).await,
        }
    }

    async fn fill_from_endpoint(&mut self) -> ApxResult<()> {
        let mut tmp = [0u8; 4096];
        let n = self.endpoint.read(&mut tmp).await?;
        if n == 0 {
            return Err(ErrorKind::Io("peer closed the connection".into()));
        }
        self.read_buf.extend_from_slice(&tmp[..n]);
        Ok(())
    }

    async fn read_greeting(&mut self) -> ApxResult<String> {
        loop {
            if let Some(end) = find_double_newline(&self.read_buf) {
                let greeting = self.read_buf[..end].to_vec();
                self.read_buf.drain(..end);
                return String::from_utf8(greeting)
                    .map_err(|_| ErrorKind::InvalidArgument("greeting is not valid UTF-8".into()));
            }
            self.fill_from_endpoint().await?;
        }
    }

    async fn read_frame(&mut self) -> ApxResult<Vec<u8>> {
        loop {
            match numheader::decode(&self.read_buf) {
                Ok((len, consumed)) => {
                    let total = consumed + len as usize;
                    if self.read_buf.len() >= total {
                        let payload = self.read_buf[consumed..total].to_vec();
                        self.read_buf.drain(..total);
                        return Ok(payload);
                    }
                }
                Err(ErrorKind::UnexpectedEnd) => {}
                Err(e) => return Err(e),
            }
            self.fill_from_endpoint().await?;
        }
    }

    /// Drive the greeting/ACK handshake to completion (spec §4.7's
    /// `INIT -> ... -> ACTIVE` transitions). Role only decides who speaks
    /// the ACK first: the server sends it right after accepting the
    /// client's greeting, the client blocks waiting to receive it. Both
    /// sides issuing the same blocking-read-before-send sequence would
    /// deadlock, since nobody would ever transmit first.
    pub async fn handshake(&mut self) -> ApxResult<()> {
        self.endpoint.write_all(command::GREETING_CURRENT.as_bytes()).await?;
        self.apply_event(ConnectionEvent::Connect)?;

        let peer_greeting = self.read_greeting().await?;
        if !command::is_valid_greeting(&peer_greeting) {
            return Err(ErrorKind::InvalidArgument("unrecognized greeting format".into()));
        }
        self.apply_event(ConnectionEvent::PeerGreeting)?;

        match self.role {
            Role::Server => {
                self.send_ack().await?;
            }
            Role::Client => {
                let frame = self.read_frame().await?;
                if frame.len() != 8 || frame != command::ACK_PAYLOAD {
                    return Err(ErrorKind::InvalidArgument("expected literal ACK payload".into()));
                }
            }
        }
        self.apply_event(ConnectionEvent::Ack)?;

        self.file_manager.set_greeting_accepted(true);
        self.publish_local_nodes().await?;
        self.apply_event(ConnectionEvent::LocalFilesRegistered)?;
        info!(role = ?self.role, "connection active");
        Ok(())
    }

    /// Publish `.out` and `.apx` files for every provide-side node instance
    /// (spec §4.7 point 1). Pure-require nodes publish nothing here; their
    /// `.in` aggregate is published by the peer that provides it.
    async fn publish_local_nodes(&mut self) -> ApxResult<()> {
        let nodes = self.node_instances.clone();
        for node in nodes {
            if node.provide_ports.is_empty() {
                continue;
            }
            let address = self.allocate_port_address(node.provide_data_len() as u32);
            let contents = node.provide_data_snapshot();
            let file = RmfFile::new(format!("{}.out", node.name), address, contents, FileType::Fixed);
            for frame in self.file_manager.attach_local_file(file)? {
                self.send_outbound(frame).await?;
            }
        }
        Ok(())
    }

    fn allocate_port_address(&mut self, size: u32) -> u32 {
        let addr = self.next_port_address;
        let boundary = address::PORT_DATA_BOUNDARY;
        let aligned = ((size + boundary - 1) / boundary) * boundary;
        self.next_port_address += aligned.max(boundary);
        addr
    }

    /// Drive the connection after the handshake: read frames, dispatch
    /// through the file manager, transmit whatever it returns.
    pub async fn run(&mut self) -> ApxResult<()> {
        self.handshake().await?;
        loop {
            let frame = match self.read_frame().await {
                Ok(f) => f,
                Err(ErrorKind::Io(reason)) => {
                    debug!(reason = %reason, "connection closing");
                    self.close().await?;
                    return Ok(());
                }
                Err(e) => return Err(e),
            };
            let (addr, _more, consumed) = address::decode(&frame)?;
            let payload = &frame[consumed..];
            let (outbound, remote_file) = self.file_manager.message_received(addr, payload)?;
            for frame_out in outbound {
                self.send_outbound(frame_out).await?;
            }
            if let Some(info) = remote_file {
                self.handle_remote_file_published(info).await?;
            }
        }
    }

    /// A peer just published a file (`FILE_INFO`). If one of our registered
    /// node instances requires exactly this node's published aggregate
    /// (same node name, a require side with a matching byte length), open it
    /// and wire its bytes straight into that node's require-port buffer —
    /// the mechanism that lets a require-only connection's ports populate as
    /// its peer publishes matching provide-ports, rather than only routing
    /// same-process writes through the signature map.
    async fn handle_remote_file_published(&mut self, info: FileInfo) -> ApxResult<()> {
        let candidate_name = info.name.strip_suffix(".out").unwrap_or(&info.name);
        let node = self
            .node_instances
            .iter()
            .find(|n| n.name == candidate_name && !n.require_ports.is_empty())
            .cloned();
        let Some(node) = node else {
            debug!(file = %info.name, "no local require-side node matches published file, not opening");
            return Ok(());
        };
        if node.require_data_len() != info.size as usize {
            warn!(
                node = %node.name,
                expected = node.require_data_len(),
                published = info.size,
                "published file size does not match local require layout, not opening"
            );
            return Ok(());
        }

        let address = info.address;
        let size = info.size;
        let file_type = info.file_type;
        let name = info.name.clone();
        let handler_node = node.clone();
        let open_frames = self.file_manager.request_open(address)?;
        self.file_manager.adopt_remote_file_as_local(
            name,
            address,
            size,
            file_type,
            Box::new(move |addr, bytes| {
                let offset = (addr - address) as usize;
                handler_node.write_require_bytes(offset, bytes)?;
                Ok(())
            }),
        )?;
        for frame in open_frames {
            self.send_outbound(frame).await?;
        }
        Ok(())
    }

    /// Sweep every registered node instance's dirty provide-ports and fan
    /// them out through the signature map (spec §1's "later writes are
    /// routed through the signature map to peer require-port buffers").
    /// Call this after writing one or more provide-ports via the public API.
    pub fn sync_dirty_ports(&self) -> ApxResult<()> {
        for node in &self.node_instances {
            for index in node.take_dirty_provide_ports() {
                let port = &node.provide_ports[index];
                let bytes = node.provide_port_bytes(index)?;
                self.signature_map.route_provide_write(&port.port_signature, &bytes)?;
            }
        }
        Ok(())
    }

    /// Tear down: drop the send buffer, detach node instances, transition to
    /// `CLOSED` (spec §4.7's close sequence).
    pub async fn close(&mut self) -> ApxResult<()> {
        if self.state.is_closed() {
            return Ok(());
        }
        self.send_buffer.clear();
        self.node_instances.clear();
        self.apply_event(ConnectionEvent::SocketClosed)?;
        warn!(role = ?self.role, "connection disconnected");
        Ok(())
    }
}

/// Index just past the first `"\n\n"` in `buf`, or `None` if not yet present.
fn find_double_newline(buf: &[u8]) -> Option<usize> {
    buf.windows(2).position(|w| w == b"\n\n").map(|i| i + 2)
}
