// CLI modules
mod args;
mod op;
mod ops;
mod state;

// In-process broker wiring and logging
mod client;
mod process;

use args::Args;
use clap::{Parser, Subcommand};
use op::Op;
use ops::{Download, Init, Logout, Status, Upload, Version};

command_enum! {
    (Download, Download),
    (Init, Init),
    (Logout, Logout),
    (Status, Status),
    (Upload, Upload),
    (Version, Version),
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let guards = process::init_logging(args.log_level, args.log_dir.as_deref());

    let ctx = op::OpContext::new(args.remote, args.config_path);

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

    // Flush buffered log lines before exiting
    drop(guards);
    std::process::exit(code);
}
