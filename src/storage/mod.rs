pub mod connection;
pub mod entity;
pub mod repository;
pub mod store;

pub use connection::establish_connection;
pub use store::{ResultStore, SqlResultStore, StoreError};
