use clap::Parser;

#[tokio::main]
async fn main() {
    let cli = wsrelay::cli::Cli::parse();
    if let Err(e) = wsrelay::cmd::dispatch(cli).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
