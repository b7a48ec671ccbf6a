/// Initializes `env_logger` the way every teacher binary does
/// (`peserver::lb::main`, `pegh::main`, ...): a single `init()` call at
/// process start, deferring entirely to `RUST_LOG`. The only addition is a
/// default filter so a binary run without `RUST_LOG` set still logs at
/// `info` instead of nothing.
pub fn init() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
}
