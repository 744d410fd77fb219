pub mod codec;
pub mod encoding;
pub mod sync;
