use async_trait::async_trait;

use super::Principal;

/// Turns an opaque token into an identity
#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// `None` for anything that is not a currently valid credential
    async fn validate(&self, token: &str) -> Option<Principal>;
}
