use camino::Utf8PathBuf;
use claims::{assert_err, assert_ok};
use tempfile::tempdir;

use super::*;

fn sample() -> ConfigFile {
    ConfigFile::new(
        Keypair::generate_ed25519(),
        NetworkConfig::new(ListenConfig::default(), BootstrapConfig::default()),
        TransferConfig::default(),
        ReposConfig::default(),
        AccessConfig::default(),
    )
}

fn home() -> (tempfile::TempDir, Utf8PathBuf) {
    let dir = tempdir().unwrap();
    let path = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();

    (dir, path)
}

#[test]
fn saved_config_loads_back() {
    let (_dir, home) = home();

    let mut config = sample();
    let repo_id: RepoId = "org/project".parse().unwrap();
    assert!(config.set_replicate(repo_id.clone(), true), "policy changed");
    let _ = config.access.pull.insert(repo_id.clone(), vec!["someone".to_owned()]);

    assert!(!ConfigFile::exists(&home), "nothing written yet");
    assert_ok!(config.save(&home));
    assert!(ConfigFile::exists(&home), "config file written");

    let loaded = assert_ok!(ConfigFile::load(&home));

    assert_eq!(
        loaded.identity.public().to_peer_id(),
        config.identity.public().to_peer_id(),
        "identity survives"
    );
    assert!(loaded.repos.replicate.contains(&repo_id), "policy survives");
    assert_eq!(loaded.access.pull[&repo_id], vec!["someone"], "allow list survives");
    assert_eq!(
        loaded.swarm.announce_interval, config.swarm.announce_interval,
        "durations survive"
    );
}

#[test]
fn swarm_section_is_flat_and_in_milliseconds() {
    let section: TransferConfig = assert_ok!(toml::from_str(
        r"
        max_concurrent_peers = 4
        dial_backoff_ms = 250
        announce_interval_ms = 5000
        "
    ));

    assert_eq!(section.protocols.max_concurrent_peers, 4, "pool size read");
    assert_eq!(
        section.protocols.dial_backoff,
        Duration::from_millis(250),
        "backoff read as milliseconds"
    );
    assert_eq!(
        section.announce_interval,
        Duration::from_secs(5),
        "announce interval read as milliseconds"
    );
    assert_eq!(
        section.protocols.max_job_attempts,
        SwarmConfig::default().max_job_attempts,
        "missing keys take defaults"
    );
}

#[test]
fn replication_policy_toggles() {
    let mut config = sample();
    let repo_id: RepoId = "org/project".parse().unwrap();

    assert!(config.set_replicate(repo_id.clone(), true), "added");
    assert!(!config.set_replicate(repo_id.clone(), true), "already present");
    assert!(config.set_replicate(repo_id.clone(), false), "removed");
    assert!(!config.set_replicate(repo_id, false), "already absent");
}

#[test]
fn tracking_is_idempotent() {
    let mut config = sample();

    assert!(config.track("/srv/repo".into()), "first time");
    assert!(!config.track("/srv/repo".into()), "second time");
    assert_eq!(config.repos.tracked.len(), 1, "listed once");
}

#[test]
fn mismatched_peer_id_is_rejected() {
    let (_dir, home) = home();

    assert_ok!(sample().save(&home));

    let path = home.join(CONFIG_FILE);
    let content = read_to_string(&path).unwrap();
    let other = Keypair::generate_ed25519().public().to_peer_id().to_base58();
    let real = ConfigFile::load(&home).unwrap().identity.public().to_peer_id().to_base58();
    write(&path, content.replace(&real, &other)).unwrap();

    let _ = assert_err!(ConfigFile::load(&home));
}
