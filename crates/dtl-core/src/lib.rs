pub mod citation;
pub mod failure;
pub mod fingerprint;
pub mod hashing;
pub mod ids;
pub mod model;
pub mod provenance;
pub mod snapshot;
pub mod switches;
pub mod types;

pub use citation::*;
pub use failure::*;
pub use fingerprint::*;
pub use hashing::*;
pub use ids::*;
pub use model::*;
pub use provenance::*;
pub use snapshot::*;
pub use switches::*;
pub use types::*;
