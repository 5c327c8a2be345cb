#[tokio::main]
async fn main() -> anyhow::Result<()> {
    snipboard_lib::run().await
}
