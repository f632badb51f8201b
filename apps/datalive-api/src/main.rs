use clap::Parser;

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
	color_eyre::install()?;

	let args = datalive_api::Args::parse();

	datalive_api::run(args).await
}
