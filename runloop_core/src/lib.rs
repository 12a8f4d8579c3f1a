#![forbid(unsafe_code)]

pub mod config;
pub mod drivers;
pub mod file_task;
pub mod http;
pub mod http_task;
pub mod image_task;
pub mod logging;
pub mod nbio;
pub mod observability;
pub mod png_stream;
pub mod queue;
pub mod runloop;
