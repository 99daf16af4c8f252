use clap::Parser;

mod api;
mod blockchain;
mod cli;
mod config;
mod wallet;

fn main() {
    // Initialize logger
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = cli::Cli::parse();
    if let Err(err) = cli::run(cli) {
        eprintln!("Error: {:#}", err);
        std::process::exit(1);
    }
}
