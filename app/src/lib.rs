pub mod bio;
pub mod cli_interface;
pub mod error;
pub mod fs;
pub mod mkfs;
pub mod mount;
pub mod param;
pub mod utils;
pub mod vfs;
