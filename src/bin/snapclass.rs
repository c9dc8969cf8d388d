//! snapclass CLI tool

use snapclass::cli;

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
