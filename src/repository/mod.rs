//! Persistence layer for harvested listings.

mod cars;
mod pool;
mod util;

pub use cars::CarRepository;
pub use pool::{AsyncSqliteConnection, AsyncSqlitePool, DieselError};
