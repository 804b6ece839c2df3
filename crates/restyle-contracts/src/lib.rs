//! Data contracts shared by the restyle engine and CLI.

pub mod config;
pub mod encoding;
pub mod jsonl;
pub mod request;
pub mod runs;
