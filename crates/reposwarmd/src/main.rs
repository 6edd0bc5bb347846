use clap::Parser;
use eyre::Result as EyreResult;

mod cli;
mod defaults;
mod logging;

use cli::RootCommand;

#[tokio::main]
async fn main() -> EyreResult<()> {
    color_eyre::install()?;

    let command = RootCommand::parse();

    logging::init(command.args.verbose)?;

    command.run().await
}
