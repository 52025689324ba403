pub mod bundle;
pub mod checks;
pub mod config;
pub mod error;
pub mod gate;

pub use bundle::*;
pub use checks::*;
pub use config::*;
pub use error::*;
pub use gate::*;
