//! DrugBank structure releases
//!
//! Each new release replaces the whole store content.

pub mod config;
pub mod source;

pub use config::DrugBankHttpConfig;
pub use source::HttpReleaseSource;
