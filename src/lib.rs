//! Live resource usage dashboard for Astra SL boards.
//!
//! The board is reached over ADB or SSH, polled for `/proc/stat` and the NPU
//! inference counter, and the resulting usage is served as a web page.

pub mod cli;
pub mod core;
pub mod observability;
pub mod server;
pub mod utils;
