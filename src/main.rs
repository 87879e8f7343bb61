fn main() {
    #[cfg(feature = "cli")]
    apspatch::cli::run();

    #[cfg(not(feature = "cli"))]
    {
        eprintln!("apspatch: CLI not enabled. Rebuild with `--features cli`.");
        std::process::exit(1);
    }
}
