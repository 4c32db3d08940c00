//! Integration flows between the store client, the bus and the domain bus.

pub mod fixtures;

mod flows;
mod lifecycle;
