mod error;
mod id;
mod local_vocab;
mod table;

pub use error::*;
pub use id::*;
pub use local_vocab::*;
pub use table::*;
