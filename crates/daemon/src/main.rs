// CLI modules
mod cli;

use clap::{Parser, Subcommand};
use cli::{args::Args, op::Op, CaseStatus, CloseSession, Download, Init, Reconcile, Version};

command_enum! {
    (CaseStatus, CaseStatus),
    (CloseSession, CloseSession),
    (Download, Download),
    (Init, Init),
    (Reconcile, Reconcile),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    // Log with the vault's configured level when there is one
    let (log_level, log_dir) = match casevault_daemon::AppState::load(args.config_path.clone()) {
        Ok(state) => (state.config.log_level(), state.config.log_dir.clone()),
        Err(_) => (tracing::Level::INFO, None),
    };
    let guards = casevault_daemon::logging::init_logging(log_level, log_dir.as_deref());

    let ctx = cli::op::OpContext::new(args.config_path);
    let code = match args.command.execute(&ctx).await {
        Ok(output) => {
            println!("{}", output);
            0
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            1
        }
    };

    // Flush the non-blocking writers before exiting
    drop(guards);
    std::process::exit(code);
}
