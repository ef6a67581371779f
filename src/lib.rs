//! Library to run frequency-gated, per-project backups.
//!
//! Each configured project is staged (files, folders, database dumps),
//! compressed into a single zip archive, optionally uploaded over SFTP and
//! reported to webhook channels. Every attempt is recorded in the [`runlog`]
//! SQLite store, which also feeds the per-project frequency gate.

#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod lock;
pub mod notify;
pub mod pipeline;
pub mod runlog;
