// Crypto module declarations

pub mod dh;
pub mod group;
pub mod prime;
