use super::error::StoreError;
use super::store::{SessionStore, TicketStore};
use crate::models::{SessionRecord, Ticket};
use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};

const SESSION_KEY_PREFIX: &str = "sso:session:";
const TICKETS_KEY: &str = "sso:tickets";

fn session_key(session_id: &str) -> String {
    format!("{}{}", SESSION_KEY_PREFIX, session_id)
}

/// Session and ticket persistence in Redis. Values are JSON; session keys
/// expire with the longest possible session lifetime.
#[derive(Clone)]
pub struct RedisStore {
    _client: Client,
    manager: ConnectionManager,
    session_ttl_seconds: i64,
}

impl RedisStore {
    pub async fn new(url: &str, session_ttl_seconds: i64) -> Result<Self, StoreError> {
        tracing::info!(url = %url, "Connecting to Redis");
        let client = Client::open(url)?;

        // ConnectionManager reconnects on its own
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            StoreError::Redis(e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
            session_ttl_seconds,
        })
    }
}

#[async_trait]
impl SessionStore for RedisStore {
    async fn load_session(&self, session_id: &str) -> Result<Option<SessionRecord>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await?;

        value
            .map(|json| serde_json::from_str(&json))
            .transpose()
            .map_err(StoreError::from)
    }

    async fn save_session(&self, record: &SessionRecord) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(record)?;

        redis::cmd("SET")
            .arg(session_key(&record.session_id))
            .arg(json)
            .arg("EX")
            .arg(self.session_ttl_seconds)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)
    }

    async fn delete_session(&self, session_id: &str) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(session_key(session_id))
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl TicketStore for RedisStore {
    async fn save_tickets(&self, tickets: &[Ticket]) -> Result<(), StoreError> {
        let mut conn = self.manager.clone();
        let json = serde_json::to_string(tickets)?;

        redis::cmd("SET")
            .arg(TICKETS_KEY)
            .arg(json)
            .query_async(&mut conn)
            .await
            .map_err(StoreError::from)
    }

    async fn load_tickets(&self) -> Result<Vec<Ticket>, StoreError> {
        let mut conn = self.manager.clone();
        let value: Option<String> = redis::cmd("GET")
            .arg(TICKETS_KEY)
            .query_async(&mut conn)
            .await?;

        match value {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key() {
        assert_eq!(session_key("abc"), "sso:session:abc");
    }
}
