use clap::Parser;
use protsieve::Cli;

// --------------------------------------------------
fn main() {
    if let Err(e) = protsieve::run(Cli::parse()) {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
