pub mod descriptions;
pub mod entries;
pub mod locations;
pub mod models;
pub mod pool;

pub use models::*;
pub use pool::*;
