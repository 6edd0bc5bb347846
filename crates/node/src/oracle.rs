//! Ed25519 request signing and a static pull-access policy.
//!
//! A signature is the signer's 32-byte public key followed by the 64-byte
//! ed25519 signature; the recovered address is the public key.

use core::fmt;
use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey, PUBLIC_KEY_LENGTH, SIGNATURE_LENGTH};
use eyre::{bail, eyre, Result as EyreResult, WrapErr};
use libp2p::identity::Keypair;
use reposwarm_config::AccessConfig;
use reposwarm_primitives::repo::RepoId;
use reposwarm_protocols::access::OracleError;
use reposwarm_protocols::{AccessOracle, Address};

#[cfg(test)]
#[path = "tests/oracle.rs"]
mod tests;

const SIGNED_LENGTH: usize = PUBLIC_KEY_LENGTH + SIGNATURE_LENGTH;

/// Who may pull which repository.
#[derive(Clone, Debug, Default)]
pub struct AccessPolicy {
    public: BTreeSet<RepoId>,
    pull: BTreeMap<RepoId, BTreeSet<Address>>,
}

impl AccessPolicy {
    /// Parses the base58 addresses of an [`AccessConfig`].
    pub fn from_config(config: &AccessConfig) -> EyreResult<Self> {
        let mut pull = BTreeMap::new();

        for (repo_id, addresses) in &config.pull {
            let parsed = addresses
                .iter()
                .map(|address| parse_address(address))
                .collect::<EyreResult<BTreeSet<_>>>()
                .wrap_err_with(|| format!("invalid pull allow list for {repo_id}"))?;

            drop(pull.insert(repo_id.clone(), parsed));
        }

        Ok(Self {
            public: config.public.clone(),
            pull,
        })
    }

    #[must_use]
    pub fn allows(&self, address: &Address, repo_id: &RepoId) -> bool {
        self.public.contains(repo_id)
            || self
                .pull
                .get(repo_id)
                .is_some_and(|allowed| allowed.contains(address))
    }
}

fn parse_address(address: &str) -> EyreResult<Address> {
    let bytes = bs58::decode(address)
        .into_vec()
        .wrap_err_with(|| format!("{address:?} is not base58"))?;

    if bytes.len() != PUBLIC_KEY_LENGTH {
        bail!("{address:?} is not an ed25519 public key");
    }

    Ok(Address::from(bytes))
}

/// The base58 form of `address`, as written in the config file.
#[must_use]
pub fn encode_address(address: &Address) -> String {
    bs58::encode(address.as_bytes()).into_string()
}

/// Signs with the node's ed25519 identity and checks [`AccessPolicy`].
pub struct KeyOracle {
    signing_key: SigningKey,
    policy: AccessPolicy,
}

impl KeyOracle {
    #[must_use]
    pub const fn new(signing_key: SigningKey, policy: AccessPolicy) -> Self {
        Self {
            signing_key,
            policy,
        }
    }

    /// Reuses the ed25519 half of a libp2p identity.
    pub fn from_identity(identity: &Keypair, policy: AccessPolicy) -> EyreResult<Self> {
        let keypair = identity
            .clone()
            .try_into_ed25519()
            .map_err(|_| eyre!("node identity is not an ed25519 key"))?;

        let signing_key = SigningKey::from_keypair_bytes(&keypair.to_bytes())
            .map_err(|err| eyre!("invalid ed25519 identity: {err}"))?;

        Ok(Self::new(signing_key, policy))
    }

    /// The address peers recover from our signatures.
    #[must_use]
    pub fn address(&self) -> Address {
        Address::from(self.signing_key.verifying_key().to_bytes())
    }
}

#[async_trait]
impl AccessOracle for KeyOracle {
    fn sign_hash(&self, data: &[u8]) -> Result<Vec<u8>, OracleError> {
        let signature = self.signing_key.sign(data);

        let mut signed = Vec::with_capacity(SIGNED_LENGTH);
        signed.extend_from_slice(self.signing_key.verifying_key().as_bytes());
        signed.extend_from_slice(&signature.to_bytes());

        Ok(signed)
    }

    fn addr_from_signed_hash(&self, data: &[u8], signature: &[u8]) -> Result<Address, OracleError> {
        if signature.len() != SIGNED_LENGTH {
            return Err(OracleError::MalformedSignature);
        }

        let (key, signature) = signature.split_at(PUBLIC_KEY_LENGTH);

        let key: [u8; PUBLIC_KEY_LENGTH] =
            key.try_into().map_err(|_| OracleError::MalformedSignature)?;
        let verifying_key =
            VerifyingKey::from_bytes(&key).map_err(|_| OracleError::MalformedSignature)?;
        let signature =
            Signature::from_slice(signature).map_err(|_| OracleError::MalformedSignature)?;

        verifying_key
            .verify_strict(data, &signature)
            .map_err(|_| OracleError::InvalidSignature)?;

        Ok(Address::from(key))
    }

    async fn address_has_pull_access(
        &self,
        address: &Address,
        repo_id: &RepoId,
    ) -> Result<bool, OracleError> {
        Ok(self.policy.allows(address, repo_id))
    }
}

impl fmt::Debug for KeyOracle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOracle")
            .field("address", &self.address())
            .field("policy", &self.policy)
            .finish()
    }
}
