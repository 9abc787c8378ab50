pub mod config;
pub mod constants;
pub mod image;
pub mod rect;
