//! Inbound validation requests from the protocol-encoding layer.

use serde::{Deserialize, Serialize};

/// Client protocol a grant was requested through. Selects the `Access`
/// variant built for the grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Cas,
    Saml,
    SelfContained,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Cas => "cas",
            Protocol::Saml => "saml",
            Protocol::SelfContained => "self_contained",
        }
    }
}

/// A resource presenting a token for validation.
#[derive(Debug, Clone)]
pub struct TokenServiceAccessRequest {
    pub resource_identifier: String,
    pub token: String,
    pub protocol: Protocol,
    /// Only accept tickets issued straight from a primary authentication.
    pub renew: bool,
    pub remote_addr: Option<String>,
}

impl TokenServiceAccessRequest {
    pub fn new(
        resource_identifier: impl Into<String>,
        token: impl Into<String>,
        protocol: Protocol,
    ) -> Self {
        Self {
            resource_identifier: resource_identifier.into(),
            token: token.into(),
            protocol,
            renew: false,
            remote_addr: None,
        }
    }

    pub fn with_renew(mut self, renew: bool) -> Self {
        self.renew = renew;
        self
    }

    pub fn with_remote_addr(mut self, remote_addr: impl Into<String>) -> Self {
        self.remote_addr = Some(remote_addr.into());
        self
    }
}

/// Options for building the response once a grant has been validated.
#[derive(Debug, Clone, Default)]
pub struct AccessResponseRequest {
    pub include_attributes: bool,
}

impl AccessResponseRequest {
    pub fn with_attributes() -> Self {
        Self {
            include_attributes: true,
        }
    }
}
