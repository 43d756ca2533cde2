//! `gmacs-plugin-word-count` binary, launched by the gmacs plugin host

use gmacs_plugin_word_count::WordCount;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> gmacs_plugin_sdk::Result<()> {
    // stdout carries the protocol; logs go to stderr, which the host forwards
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("GMACS_LOG").unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    gmacs_plugin_sdk::serve_plugin(WordCount::new()).await
}
