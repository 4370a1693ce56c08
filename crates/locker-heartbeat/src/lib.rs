mod recovery;
mod tracker;

pub use recovery::Recovery;
pub use tracker::{HeartbeatInput, HeartbeatTracker};
