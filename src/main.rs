//! liquidplan CLI: execution planning for robotic liquid handlers.

use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "liquidplan",
    version,
    about = "Execution planner for robotic liquid handlers: staging, volume propagation, input allocation, plate layout"
)]
struct Cli {
    #[command(subcommand)]
    command: liquidplan::cli::Commands,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    if let Err(e) = liquidplan::cli::dispatch(cli.command) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
