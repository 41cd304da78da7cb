//! Factory functions for building servers with common setups.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::persistence::{BackingStore, MemoryStore};
use crate::server::ChannelServer;
use std::sync::Arc;
use world_core::SystemTimeSource;

/// Creates a channel server on the system clock with in-memory `world` and
/// `lobby` stores.
///
/// # Example
///
/// ```rust
/// use channel_server::{create_server, ServerConfig};
///
/// let config = ServerConfig {
///     worker_count: 2,
///     enable_network: false,
///     ..Default::default()
/// };
/// let server = create_server(config).unwrap();
/// assert_eq!(server.generic_workers().len(), 2);
/// ```
pub fn create_server(config: ServerConfig) -> Result<ChannelServer, ServerError> {
    let timeout = config.persistence_timeout();
    let stores: Vec<Arc<dyn BackingStore>> = vec![
        Arc::new(MemoryStore::new("world", timeout)),
        Arc::new(MemoryStore::new("lobby", timeout)),
    ];
    create_server_with_stores(config, stores)
}

/// Creates a channel server on the system clock with the given stores.
pub fn create_server_with_stores(
    config: ServerConfig,
    stores: Vec<Arc<dyn BackingStore>>,
) -> Result<ChannelServer, ServerError> {
    ChannelServer::new(config, stores, SystemTimeSource::shared())
}
