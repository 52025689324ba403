pub mod error;
pub mod evidence;
pub mod ledger;
pub mod memory;
pub mod traits;

pub use error::*;
pub use evidence::*;
pub use ledger::*;
pub use memory::*;
pub use traits::*;
