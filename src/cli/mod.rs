//! CLI module for the snapclass binary
//!
//! Only available with the `cli` and `burn-backend` features.

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli};
