pub mod engine;
pub mod medium;

pub use engine::StorageEngine;
pub use medium::RocksMedium;
