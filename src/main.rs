// src/main.rs

use agentdag::{cli, logging, run};

#[tokio::main]
async fn main() {
    let args = cli::parse();
    if let Err(e) = logging::init_logging(args.log_level) {
        eprintln!("agentdag: failed to initialise logging: {e}");
        std::process::exit(2);
    }

    if let Err(err) = run(args).await {
        eprintln!("agentdag error: {err}");
        std::process::exit(err.exit_code());
    }
}
