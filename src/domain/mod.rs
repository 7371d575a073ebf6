//! Domain layer: plain models and the ports the rest of the crate depends
//! on, free of persistence or transport concerns.

pub mod models;
pub mod ports;
