use threat_relay_cli::run_cli;

#[tokio::main]
async fn main() {
    // Run CLI and handle errors
    if let Err(e) = run_cli().await {
        // Logging may not be initialized yet when configuration fails
        eprintln!("threat-relay: {}", e);
        std::process::exit(e.exit_code());
    }
}
