pub mod cancel;
pub mod config;
pub mod env_guard;
pub mod error;
pub mod hex;
pub mod rpc;
