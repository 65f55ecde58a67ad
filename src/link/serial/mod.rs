pub mod protocol;
pub mod liveness;
pub mod port;
