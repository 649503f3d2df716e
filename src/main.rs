//! stretch: provision fleet hosts on a cloud provider.

use clap::Parser;

fn main() {
    let cli = stretch::cli::Cli::parse();
    if let Err(e) = stretch::cli::run(cli) {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
