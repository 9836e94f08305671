pub mod app;
pub mod classify;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fs_util;
pub mod input;
pub mod layout;
pub mod metadata;
pub mod output;
pub mod sra;
