use procguard::cli::{self, Cli};

fn main() {
    if let Err(e) = Cli::run() {
        cli::report_error(&e);
        std::process::exit(1);
    }
}
