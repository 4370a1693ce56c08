pub mod crc;
pub mod frame;
pub mod health;
pub mod pulse;
pub mod transport;

pub use health::{HealthCounters, HealthStatus};
pub use pulse::{pulse as pulse_locker, PulseRequest};
pub use transport::{serial_parity, FakeTransport, ModbusTransport, SerialTransport};
