pub mod api;
pub mod backend;
pub mod config;
pub mod domain;
pub mod error;
pub mod mount;
pub mod utils;
