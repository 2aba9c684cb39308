pub mod aligned;
pub mod boxed;
pub mod buffer;
pub mod scratch;
