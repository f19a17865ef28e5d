use clap::Parser;

use loopback_stream_server::config::ServerArgs;
use loopback_stream_server::error::ServerError;

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = ServerArgs::parse();
    log::debug!("{:?}", args);

    #[cfg(target_os = "windows")]
    return loopback_stream_server::run(args, loopback_stream_windows::WasapiDirectory::new()).await;

    #[cfg(not(target_os = "windows"))]
    {
        Err(ServerError::UnsupportedPlatform(std::env::consts::OS))
    }
}
