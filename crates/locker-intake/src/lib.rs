mod debounce;
mod dispatch;
mod normalize;
mod reader;

pub use debounce::Debouncer;
pub use dispatch::{dispatch, Action, OwnedLocker, OwnershipLookup};
pub use normalize::{normalize_device_hash, normalize_uid};
pub use reader::{FakeRfidReader, RfidReader, SerialRfidReader};
