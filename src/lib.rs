#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod clock;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod memory;
pub mod models;
pub mod project;
pub mod provider;
pub mod session;
pub mod tokens;

pub use error::{Error, Result};
