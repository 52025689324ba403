pub mod export;
pub mod manifest;
pub mod store;

pub use export::*;
pub use manifest::*;
pub use store::*;
