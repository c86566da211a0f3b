use async_trait::async_trait;

use crate::error::Result;
use crate::models::PlayerPresence;

/// A backend server as the registry knows it.
#[derive(Debug, Clone)]
pub struct RegisteredServer {
    pub name: String,
    pub address: String,
    pub players: Vec<PlayerPresence>,
}

/// Source of truth for which backends exist and who is on them.
///
/// `servers` must return servers in a stable order; that order is the order
/// the viewer sees them in.
#[async_trait]
pub trait ServerRegistry: Send + Sync {
    async fn servers(&self) -> Result<Vec<RegisteredServer>>;

    async fn server(&self, name: &str) -> Result<Option<RegisteredServer>>;
}
