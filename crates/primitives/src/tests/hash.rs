use claims::{assert_err, assert_matches};

use super::*;

#[test]
fn new_matches_known_digest() {
    let hash = Hash::new(b"hello");

    assert_eq!(
        hash.to_hex(),
        "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        "sha256 of 'hello' must match the reference digest"
    );
}

#[test]
fn of_parts_equals_hash_of_concatenation() {
    assert_eq!(
        Hash::of_parts(&[b"replicate:", b"repo"]),
        Hash::new(b"replicate:repo"),
        "hashing parts must equal hashing the joined bytes"
    );
}

#[test]
fn parse_roundtrips_display() {
    let hash = Hash::new(b"data");
    let parsed: Hash = hash.to_string().parse().unwrap();

    assert_eq!(parsed, hash, "display output must parse back");
}

#[test]
fn parse_rejects_wrong_length() {
    assert_matches!("abcd".parse::<Hash>(), Err(HashError::InvalidLength));
}

#[test]
fn parse_rejects_non_hex() {
    assert_err!("zz".repeat(HASH_LEN).parse::<Hash>());
}
