//! Domain model: value types, nodes, vectors and the ports the engine talks through.

pub mod account;
pub mod address;
pub mod endpoint;
pub mod node;
pub mod ports;
pub mod request;
pub mod time;
pub mod vector;
