//! feedsync: a single-user RSS sync daemon.
//!
//! Mirrors a remote reader account (Inoreader-shaped API) into a local
//! SQLite store under a fixed daily call budget, pushes local read/star
//! mutations back through a durable retry queue, and offers on-demand
//! content extraction and AI summarization over HTTP.

pub mod api;
pub mod config;
pub mod db;
pub mod extract;
pub mod inoreader;
pub mod model;
pub mod scheduler;
pub mod summarize;
pub mod sync;
