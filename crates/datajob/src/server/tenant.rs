use std::fmt::{Display, Formatter};

use axum::http::HeaderMap;
use serde::{Deserialize, Serialize};

use crate::common::error::DataJobError;

const MAX_TENANT_NAME_LENGTH: usize = 128;

/// Name of a tenant that owns jobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct TenantName(String);

impl TenantName {
    pub fn new(name: &str) -> crate::Result<Self> {
        let valid = !name.is_empty()
            && name.len() <= MAX_TENANT_NAME_LENGTH
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if valid {
            Ok(Self(name.to_string()))
        } else {
            Err(DataJobError::InvalidTenant(format!(
                "tenant name `{name}` must be 1-{MAX_TENANT_NAME_LENGTH} characters of [A-Za-z0-9-_.]"
            )))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for TenantName {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Proof that a request was made on behalf of a tenant.
///
/// It can only be produced by an [`Authenticator`], so the job manager never works with raw,
/// unchecked request data.
#[derive(Debug, Clone)]
pub struct TenantContext {
    tenant: TenantName,
}

impl TenantContext {
    fn new(tenant: TenantName) -> Self {
        Self { tenant }
    }

    pub fn tenant(&self) -> &TenantName {
        &self.tenant
    }

    #[cfg(test)]
    pub(crate) fn for_tenant(name: &str) -> Self {
        Self::new(TenantName::new(name).unwrap())
    }
}

/// Establishes which tenant issued a request.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, headers: &HeaderMap) -> crate::Result<TenantContext>;
}

/// Takes the tenant name from a request header.
///
/// The header is expected to carry a signed token in the future. Until the token can be
/// verified, its value is only checked to be a well-formed tenant name.
pub struct HeaderAuthenticator {
    header: String,
}

impl HeaderAuthenticator {
    pub fn new(header: String) -> Self {
        Self { header }
    }
}

impl Authenticator for HeaderAuthenticator {
    fn authenticate(&self, headers: &HeaderMap) -> crate::Result<TenantContext> {
        // TODO: verify the token signature and extract the tenant from its claims
        let value = headers
            .get(self.header.as_str())
            .ok_or_else(|| DataJobError::InvalidTenant(format!("missing `{}` header", self.header)))?
            .to_str()
            .map_err(|_| {
                DataJobError::InvalidTenant(format!("`{}` header is not valid ASCII", self.header))
            })?;
        let tenant = TenantName::new(value.trim())?;
        Ok(TenantContext::new(tenant))
    }
}
