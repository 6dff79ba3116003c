//! Offline downloads for a TV streaming client: a single-worker download
//! queue, its state registry, and the reconciliation of that state with the
//! files on disk.

pub mod api;
pub mod application;
pub mod config;
pub mod domain;
pub mod services;
pub mod storage;
pub mod utils;
