pub mod app;
pub mod cancel;
pub mod checksum;
pub mod config;
pub mod coordinator;
pub mod domain;
pub mod ena;
pub mod error;
pub mod fetcher;
pub mod manifest;
pub mod metadata;
pub mod output;
pub mod resolver;
pub mod store;
pub mod summary;
