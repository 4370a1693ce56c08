mod manager;

pub use locker_core::GuardMap;
pub use manager::StateManager;
