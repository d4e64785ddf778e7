use live_voice_rs::audio::{AlsaInput, AlsaOutput};
use live_voice_rs::{Config, SessionController, SessionStatus, WsTransport};
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info 级别，可用 RUST_LOG 覆盖
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // 加载配置
    let mut config = Config::new().map_err(anyhow::Error::msg)?;

    // 令牌可以不编译进二进制，运行时从环境变量传入
    if let Ok(token) = std::env::var("LIVE_VOICE_TOKEN") {
        config.ws_token = token;
    }
    if config.ws_token.is_empty() {
        warn!("No access token configured, the endpoint will probably reject the connection");
    }

    let input = AlsaInput::new(config.capture_device.clone());
    let output = AlsaOutput::new(
        config.playback_device.clone(),
        config.playback_channels,
        config.playback_period_size,
    );
    let mut controller = SessionController::new(config, WsTransport::new(), input, output);

    // 状态输出，UI 外壳可以直接消费这些 JSON
    let mut status_rx = controller.subscribe();
    tokio::spawn(async move {
        loop {
            match status_rx.recv().await {
                Ok(status) => {
                    let json = serde_json::to_string(&status).unwrap_or_default();
                    match status {
                        SessionStatus::Error(_) => error!(%json, "Status"),
                        _ => info!(%json, "Status"),
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "Status printer lagging"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    // 监听 Ctrl+C 信号，相当于挂断按钮
    let handle = controller.handle();
    tokio::spawn(async move {
        if signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, shutting down...");
            handle.stop();
        }
    });

    info!(app = env!("APP_NAME"), version = env!("APP_VERSION"), "Starting voice session");
    controller.run().await?;
    info!("Bye");
    Ok(())
}
