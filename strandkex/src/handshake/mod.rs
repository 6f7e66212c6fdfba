// Handshake module declarations

pub mod state;
