mod log_source;
mod repository;
mod strategy;

pub use log_source::*;
pub use repository::*;
pub use strategy::*;
