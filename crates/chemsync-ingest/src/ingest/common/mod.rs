//! Shared transport and container utilities

pub mod container;
pub mod ftp;

pub use container::{ContainerKind, ContainerReader, DEFAULT_MEMBER_SUFFIX};
pub use ftp::{FtpClient, FtpConfig, FtpEntry};
