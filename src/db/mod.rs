mod connection;
mod query;
mod schema;
#[cfg(test)]
pub(crate) mod testing;

pub use connection::*;
pub use query::*;
pub use schema::*;
