pub mod commands;
pub mod kiosks;
pub mod rfid;
