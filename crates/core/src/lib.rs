pub mod config;
pub mod error;
pub mod layer;
pub mod task;

pub use error::*;
pub use layer::LayerType;
pub use task::*;
