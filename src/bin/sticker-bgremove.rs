//! Sticker background removal CLI

use sticker_bgremove::cli;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}
