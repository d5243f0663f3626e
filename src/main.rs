#[tokio::main]
async fn main() {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));
    let exit_code = hostwatch::run().await;
    std::process::exit(exit_code);
}
