#[tokio::main]
async fn main() {
    if let Err(err) = cover_downloader_lib::run().await {
        tracing::error!(error = %err, "cover-downloader failed");
        std::process::exit(1);
    }
}
