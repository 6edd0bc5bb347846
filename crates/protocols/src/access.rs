//! Request signing and pull-access checks.

use core::fmt;

use async_trait::async_trait;
use libp2p::PeerId;
use reposwarm_network_primitives::messages::ResponseStatus;
use reposwarm_primitives::repo::RepoId;
use thiserror::Error;
use tracing::warn;

/// Identity recovered from a signed request.
#[derive(Clone, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Address(Vec<u8>);

impl Address {
    /// Raw address bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Address {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes.to_vec())
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(&hex::encode(&self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Address").field(&hex::encode(&self.0)).finish()
    }
}

/// Failures of the access oracle.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum OracleError {
    /// The signature bytes are not well formed.
    #[error("malformed signature")]
    MalformedSignature,

    /// The signature does not verify.
    #[error("signature does not verify")]
    InvalidSignature,

    /// The oracle could not answer.
    #[error("access oracle unavailable: {0}")]
    Unavailable(String),
}

/// Signs outbound requests and decides who may pull what.
#[async_trait]
pub trait AccessOracle: Send + Sync + 'static {
    /// Signs `data` with this node's key.
    fn sign_hash(&self, data: &[u8]) -> Result<Vec<u8>, OracleError>;

    /// Recovers the signer of `data`.
    fn addr_from_signed_hash(&self, data: &[u8], signature: &[u8]) -> Result<Address, OracleError>;

    /// Whether `address` may pull objects of `repo_id`.
    async fn address_has_pull_access(
        &self,
        address: &Address,
        repo_id: &RepoId,
    ) -> Result<bool, OracleError>;
}

/// Checks a signed request against the oracle.
///
/// Every failure maps to [`ResponseStatus::Unauthorized`].
pub(crate) async fn authorize(
    oracle: &dyn AccessOracle,
    peer_id: PeerId,
    repo_id: &RepoId,
    signature: &[u8],
) -> Result<Address, ResponseStatus> {
    let address = match oracle.addr_from_signed_hash(repo_id.as_bytes(), signature) {
        Ok(address) => address,
        Err(err) => {
            warn!(%peer_id, %repo_id, %err, "Rejecting request with bad signature");
            return Err(ResponseStatus::Unauthorized);
        }
    };

    match oracle.address_has_pull_access(&address, repo_id).await {
        Ok(true) => Ok(address),
        Ok(false) => {
            warn!(%peer_id, %repo_id, %address, "Address has no pull access");
            Err(ResponseStatus::Unauthorized)
        }
        Err(err) => {
            warn!(%peer_id, %repo_id, %address, %err, "Failed to check pull access");
            Err(ResponseStatus::Unauthorized)
        }
    }
}
