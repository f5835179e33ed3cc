//! HTTP surface: sync control, article services, diagnostics.

pub mod handlers;
pub mod server;

pub use server::{router, run, AppContext};
