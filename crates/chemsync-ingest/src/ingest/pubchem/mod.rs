//! PubChem compound feed
//!
//! A full dump is loaded once, then the store follows the daily and weekly
//! delta windows published on the PubChem FTP server.

pub mod config;
pub mod source;

pub use config::PubChemFtpConfig;
pub use source::FtpDeltaSource;
