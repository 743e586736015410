//! Proxy Pool - a self-maintaining pool of validated proxies
//!
//! Proxies harvested from vendor listing pages are validated against probe
//! endpoints and kept in a shared store. A check loop re-validates the pool
//! and evicts dead members; a replenishment loop fetches new candidates when
//! the pool runs low or a periodic refresh is due.

pub mod catalog;
pub mod config;
pub mod error;
pub mod pool;
pub mod proxy;
pub mod store;

pub use catalog::{
    SqliteCatalog, StaticCatalog, ValidatorCatalog, ValidatorEndpoint, ValidatorPool,
    VendorCatalog, VendorSource, VendorStatus,
};
pub use config::Config;
pub use error::Error;
pub use pool::{CheckWorker, FetchWorker, PoolState, ReplenishmentController, Supervisor};
pub use proxy::*;
pub use store::{MemoryStore, ProxyStore, RedisStore, StoreError};

/// Application result type
pub type Result<T> = std::result::Result<T, Error>;
