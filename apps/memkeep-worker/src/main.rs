use clap::Parser;

use memkeep_worker::Args;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = Args::parse();

	memkeep_worker::run(args).await
}
