pub mod db;
pub mod locks;
pub mod log;
pub mod memory;
pub mod models;
pub mod queries;
pub mod schema;
pub mod store;
pub mod time_serde;

mod error;

pub use error::Error;

use std::{future::Future, pin::Pin};

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
