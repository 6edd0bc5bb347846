use camino::Utf8PathBuf;
use clap::{ArgAction, Parser, Subcommand};
use const_format::concatcp;
use eyre::{bail, Result as EyreResult};
use reposwarm_config::ConfigFile;
use reposwarm_network::config::ListenConfig;
use reposwarm_node::{Node, NodeConfig};

use crate::defaults;

mod fetch;
mod init;
mod policy;
mod replicate;
mod run;
mod track;

use fetch::FetchCommand;
use init::InitCommand;
use policy::SetReplicationPolicyCommand;
use replicate::ReplicateCommand;
use run::RunCommand;
use track::TrackCommand;

pub const EXAMPLES: &str = r"
  # Initialize a new node
  $ reposwarmd --home data/ init --boot-nodes /ip4/10.0.0.1/tcp/2428/p2p/12D3KooW...

  # Serve a local repository
  $ reposwarmd --home data/ track ~/src/project --repo-id org/project

  # Replicate org/project whenever someone asks
  $ reposwarmd --home data/ set-replication-policy org/project true

  # Run the node
  $ reposwarmd --home data/ run

  # Ask the swarm's replicators to copy a tracked repository
  $ reposwarmd --home data/ replicate org/project
";

#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
#[command(after_help = concatcp!(
    "Environment variables:\n",
    "  REPOSWARM_HOME    Directory for config and replicas\n\n",
    "Examples:",
    EXAMPLES
))]
pub struct RootCommand {
    #[command(flatten)]
    pub args: RootArgs,

    #[command(subcommand)]
    pub action: SubCommands,
}

#[derive(Debug, Subcommand)]
pub enum SubCommands {
    Init(InitCommand),
    #[command(alias = "up")]
    Run(RunCommand),
    Track(TrackCommand),
    SetReplicationPolicy(SetReplicationPolicyCommand),
    Fetch(FetchCommand),
    Replicate(ReplicateCommand),
}

#[derive(Debug, Parser)]
pub struct RootArgs {
    /// Directory for config and replicas
    #[arg(long, value_name = "PATH", default_value_t = defaults::default_node_dir())]
    #[arg(env = "REPOSWARM_HOME", hide_env_values = true)]
    pub home: Utf8PathBuf,

    /// Log more; repeat for trace output. Ignored when RUST_LOG is set
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,
}

impl RootCommand {
    pub async fn run(self) -> EyreResult<()> {
        match self.action {
            SubCommands::Init(init) => init.run(&self.args),
            SubCommands::Run(run) => run.run(&self.args).await,
            SubCommands::Track(track) => track.run(&self.args).await,
            SubCommands::SetReplicationPolicy(policy) => policy.run(&self.args),
            SubCommands::Fetch(fetch) => fetch.run(&self.args).await,
            SubCommands::Replicate(replicate) => replicate.run(&self.args).await,
        }
    }
}

/// Starts a short-lived node with the home identity on an ephemeral port,
/// so it can run beside a long-lived one.
async fn start_transient_node(root_args: &RootArgs) -> EyreResult<Node> {
    let home = &root_args.home;

    if !ConfigFile::exists(home) {
        bail!("Node is not initialized in {home:?}");
    }

    let mut config = NodeConfig::from_file(home.clone(), ConfigFile::load(home)?)?;
    config.network.swarm = ListenConfig::on_port(0);

    Node::start(config).await
}
