//! Helpers shared by the connection layer

pub mod autoconnect;
