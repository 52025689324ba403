pub mod config;
pub mod engine;
pub mod runner;
pub mod scenario;
pub mod util;

pub use config::*;
pub use engine::*;
pub use runner::*;
pub use util::*;
