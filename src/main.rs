use std::sync::Arc;

use tokio::signal;
use tokio::sync::mpsc;

use voicelink::{AlsaDevice, Config, LiveSession, SessionCallbacks};

const DEFAULT_PROMPT: &str =
    "You are a helpful voice assistant. Keep replies brief and conversational.";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    env_logger::init();

    // 加载配置（编译时从 config.toml 读取）
    let config = Config::new().map_err(anyhow::Error::msg)?;
    log::info!(
        "{} {} starting",
        env!("APP_NAME"),
        env!("APP_VERSION"),
    );

    // 系统提示词可通过第一个命令行参数覆盖
    let system_prompt = std::env::args().nth(1).unwrap_or_else(|| DEFAULT_PROMPT.to_string());

    let device = Arc::new(AlsaDevice::new(config.capture_device, config.playback_device));

    // 会话结束通知通道，让主循环在出错或关闭时退出
    let (done_tx, mut done_rx) = mpsc::channel::<()>(1);
    let error_done = done_tx.clone();
    let callbacks = SessionCallbacks {
        on_open: Box::new(|| log::info!("Session open, speak when ready")),
        on_error: Box::new(move |e| {
            log::error!("Session error: {}", e);
            let _ = error_done.try_send(());
        }),
        on_close: Box::new(move || {
            log::info!("Session closed");
            let _ = done_tx.try_send(());
        }),
    };

    let session = LiveSession::start(config, device, &system_prompt, callbacks);

    tokio::select! {
        // 监听 Ctrl+C 信号
        _ = signal::ctrl_c() => {
            log::info!("Received Ctrl+C, shutting down...");
            session.stop();
        }
        _ = done_rx.recv() => {}
    }

    Ok(())
}
