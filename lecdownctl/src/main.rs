use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = lecdownctl::Cli::parse();
    if let Err(err) = lecdownctl::run(cli).await {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
