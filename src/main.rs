fn main() {
    if let Err(e) = msgrelay::logging::init() {
        eprintln!("warning: {e}");
    }
    if let Err(e) = msgrelay::cli::run() {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}
