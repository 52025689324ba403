pub mod config;
pub mod gate;

pub use config::*;
pub use gate::*;
