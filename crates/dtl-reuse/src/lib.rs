pub mod cache;
pub mod decision;

pub use cache::*;
pub use decision::*;
