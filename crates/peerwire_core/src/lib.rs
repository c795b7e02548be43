pub mod constants;
pub mod error;
pub mod fast_set;
pub mod hash_id;
pub mod lengths;

pub use error::Error;
pub use hash_id::Id20;
