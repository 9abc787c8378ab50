pub mod detection;
pub mod input;
pub mod pipeline;
pub mod shared;
