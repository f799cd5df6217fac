//! Test helpers for sso-service integration tests.
//!
//! Everything runs in-process: an `InMemoryStore` stands in for Redis and a
//! `MockLogoutNotifier` for the resources receiving logout requests.

#![allow(dead_code)]

use service_core::config::Config;
use sso_service::{
    build_router,
    config::{
        Environment, LogoutConfig, RegistryConfig, SsoConfig, StoreBackend, StoreConfig,
        TicketConfig,
    },
    models::{AccessResponseRequest, Protocol, TokenServiceAccessRequest},
    services::{InMemoryStore, MockLogoutNotifier, SsoService, TicketRegistry},
    AppState,
};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub const APP: &str = "https://app.example.com/";
pub const PORTAL: &str = "https://portal.example.com/";

pub fn test_config() -> SsoConfig {
    SsoConfig {
        common: Config::default(),
        environment: Environment::Dev,
        service_name: "sso-service-test".to_string(),
        service_version: "0.0.0-test".to_string(),
        log_level: "error".to_string(),
        otlp_endpoint: None,
        node_id: Some("test".to_string()),
        tickets: TicketConfig::default(),
        registry: RegistryConfig::default(),
        logout: LogoutConfig {
            enabled: true,
            notification_timeout_ms: 200,
            max_concurrency: 4,
        },
        store: StoreConfig {
            backend: StoreBackend::Memory,
            redis_url: None,
        },
    }
}

pub struct TestSso {
    pub sso: Arc<SsoService>,
    pub notifier: Arc<MockLogoutNotifier>,
    pub store: Arc<InMemoryStore>,
    pub config: SsoConfig,
}

impl TestSso {
    pub fn new() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: SsoConfig) -> Self {
        Self::build(
            config,
            Arc::new(MockLogoutNotifier::accepting()),
            Arc::new(InMemoryStore::new()),
        )
    }

    /// A service over an existing store, as after a restart.
    pub fn build(
        config: SsoConfig,
        notifier: Arc<MockLogoutNotifier>,
        store: Arc<InMemoryStore>,
    ) -> Self {
        let registry = Arc::new(TicketRegistry::from_config(&config));
        let sso = Arc::new(SsoService::new(
            &config,
            registry,
            store.clone(),
            store.clone(),
            notifier.clone(),
        ));
        Self {
            sso,
            notifier,
            store,
            config,
        }
    }

    /// Create a session for `alice` and return `(session_id, tgt_id)`.
    pub async fn login(&self) -> (String, String) {
        let attributes = BTreeMap::from([
            ("mail".to_string(), "alice@example.com".to_string()),
            ("department".to_string(), "engineering".to_string()),
        ]);
        let session = self
            .sso
            .create_session("alice", attributes)
            .await
            .expect("Failed to create session");
        (session.session_id, session.ticket_granting_ticket.id)
    }

    pub async fn service_ticket(&self, tgt: &str, resource: &str) -> String {
        self.sso
            .grant_service_ticket(tgt, resource, false)
            .await
            .expect("Failed to grant service ticket")
            .id
    }
}

pub fn cas(resource: &str, token: &str) -> TokenServiceAccessRequest {
    TokenServiceAccessRequest::new(resource, token, Protocol::Cas)
}

pub fn with_attributes() -> AccessResponseRequest {
    AccessResponseRequest::with_attributes()
}

pub struct TestApp {
    pub address: String,
    pub sso: TestSso,
}

impl TestApp {
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        let sso = TestSso::new();
        let state = AppState {
            config: sso.config.clone(),
            sso: sso.sso.clone(),
        };
        let app = build_router(state);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        tokio::spawn(async move {
            let _ = service_core::axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await;
        });

        Ok(Self {
            address: format!("http://{}", addr),
            sso,
        })
    }

    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::new()
    }
}
