//! Lantern command-line entry point.

#[tokio::main]
async fn main() {
    if let Err(e) = lantern::cli::run().await {
        eprintln!("{} {:#}", console::style("Error:").red().bold(), e);
        std::process::exit(1);
    }
}
