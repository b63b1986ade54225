use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    use authstore::util::cli::*;

    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let opts = Options::parse();
    if let Err(e) = run_cli_action(opts).await {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
    println!("OK!");
}
