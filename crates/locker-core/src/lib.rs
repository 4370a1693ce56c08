pub mod config;
pub mod constants;
pub mod error;
pub mod guard;
pub mod types;
pub mod wire;

pub use error::LockerError;
pub use guard::GuardMap;
