pub mod policy;
pub mod rule;
pub mod types;
pub mod validator;

pub use policy::*;
pub use rule::*;
pub use types::*;
pub use validator::*;
