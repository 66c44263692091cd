use anyhow::Result;

#[tokio::main]
pub async fn main() -> Result<()> {
    chainsink::start_indexing().await
}
