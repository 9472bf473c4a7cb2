use clap::Parser;
use specwatch_cli::SpecwatchCli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = SpecwatchCli::parse();
    specwatch_cli::init_logging(cli.verbose);
    cli.run().await
}
