// Bencode encoding used by the BEP10 extension protocol payloads.
//
// Values are parsed into an owned tree, there is no serde layer.

mod bencode_value;
mod deserialize;
mod serialize;

pub use bencode_value::*;
pub use deserialize::*;
pub use serialize::*;
