//! RMF (Remote Memory File): the wire protocol, address space, command
//! frames, and file manager (spec §3, §4.5, §4.6, §4.8).

pub mod address;
pub mod command;
pub mod file;
pub mod file_manager;
pub mod numheader;

pub use address::{is_command_address, CMD_AREA_START_ADDRESS};
pub use command::Command;
pub use file::File;
pub use file_manager::{FileManager, OutboundFrame};
