mod connection;
mod engine;
mod memory;
mod query;

pub use connection::*;
pub use engine::*;
pub use memory::*;
pub use query::*;
