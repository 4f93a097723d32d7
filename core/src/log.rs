// SPDX-License-Identifier: MPL-2.0

/// Installs a global `tracing` subscriber that prints to standard output.
pub fn init() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        // Verbosity comes from `RUST_LOG`, e.g. `RUST_LOG=r4k_cpu=debug`.
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(true)
        .with_level(true)
        // The target is mostly just noise.
        .with_target(false)
        .without_time()
        .init();
}
