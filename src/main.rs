//! `velac` entry point.

fn main() {
    if let Err(e) = vela::cli::run_cli() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
