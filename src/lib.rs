pub mod app;
pub mod archive;
pub mod config;
pub mod domain;
pub mod download;
pub mod error;
pub mod fetch;
pub mod formats;
pub mod fs_util;
pub mod lock;
pub mod media;
pub mod output;
pub mod package_index;
pub mod process;
pub mod provision;
pub mod store;
pub mod update;
pub mod verify;
