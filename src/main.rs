#[tokio::main]
async fn main() {
    dugout::start_server().await;
}
