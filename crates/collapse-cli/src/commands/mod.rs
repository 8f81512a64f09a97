//! CLI command implementations.

pub mod demo;
pub mod health;
pub mod init;
pub mod search;
pub mod serve;
