//! Outer surfaces: the request router and the scenario simulator's I/O.

pub mod csv;
pub mod json;
pub mod router;
pub mod scenario;
