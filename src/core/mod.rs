pub mod codec;
pub mod key;

pub use codec::*;
pub use key::*;
