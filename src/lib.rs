// Library root: re-exports all modules so integration tests and external
// consumers can access the crate's public API.

pub mod app;
pub mod classify;
pub mod config;
pub mod db;
pub mod host;
pub mod presence;
pub mod render;
pub mod roster;
pub mod scrape;
pub mod wizard;
