use claims::{assert_err, assert_ok};

use super::*;

fn repo_id(id: &str) -> RepoId {
    id.parse().unwrap()
}

fn oracle(policy: AccessPolicy) -> KeyOracle {
    KeyOracle::from_identity(&Keypair::generate_ed25519(), policy).unwrap()
}

#[test]
fn signature_recovers_the_signer() {
    let signer = oracle(AccessPolicy::default());
    let verifier = oracle(AccessPolicy::default());

    let signature = assert_ok!(signer.sign_hash(b"org/project"));

    assert_eq!(signature.len(), SIGNED_LENGTH, "public key then signature");

    let address = assert_ok!(verifier.addr_from_signed_hash(b"org/project", &signature));

    assert_eq!(address, signer.address(), "signer's public key is the address");
}

#[test]
fn tampered_data_does_not_verify() {
    let signer = oracle(AccessPolicy::default());

    let signature = signer.sign_hash(b"org/project").unwrap();

    assert!(
        matches!(
            signer.addr_from_signed_hash(b"org/other", &signature),
            Err(OracleError::InvalidSignature)
        ),
        "signature covers the repository id"
    );
}

#[test]
fn truncated_signature_is_malformed() {
    let signer = oracle(AccessPolicy::default());

    let signature = signer.sign_hash(b"org/project").unwrap();

    assert!(
        matches!(
            signer.addr_from_signed_hash(b"org/project", &signature[..40]),
            Err(OracleError::MalformedSignature)
        ),
        "short input is rejected before verification"
    );
}

async fn can(oracle: &KeyOracle, address: &Address, id: &str) -> bool {
    oracle
        .address_has_pull_access(address, &repo_id(id))
        .await
        .unwrap()
}

#[tokio::test]
async fn policy_grants_public_and_listed() {
    let listed = oracle(AccessPolicy::default()).address();
    let stranger = oracle(AccessPolicy::default()).address();

    let mut config = AccessConfig::default();
    let _ = config.public.insert(repo_id("org/open"));
    let _ = config
        .pull
        .insert(repo_id("org/closed"), vec![encode_address(&listed)]);

    let oracle = oracle(AccessPolicy::from_config(&config).unwrap());

    assert!(can(&oracle, &stranger, "org/open").await, "public repo is open");
    assert!(can(&oracle, &listed, "org/closed").await, "listed address may pull");
    assert!(!can(&oracle, &stranger, "org/closed").await, "others may not");
    assert!(!can(&oracle, &listed, "org/elsewhere").await, "lists are per repository");
}

#[test]
fn bad_allow_list_entry_is_an_error() {
    let mut config = AccessConfig::default();
    let _ = config
        .pull
        .insert(repo_id("org/closed"), vec!["not-base58-0OIl".to_owned()]);

    let _ = assert_err!(AccessPolicy::from_config(&config));
}
