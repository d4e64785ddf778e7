use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    network: Network,
    model: Model,
    audio: Audio,
    session: Session,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Network {
    ws_url: String,
    ws_token: String,
    client_id: String,
    connect_timeout_ms: u64,
}

#[derive(Deserialize)]
struct Model {
    name: String,
    voice_name: String,
    system_instruction: String,
}

#[derive(Deserialize)]
struct Audio {
    capture_device: String,
    playback_device: String,
    capture_sample_rate: u32,
    capture_frame_samples: usize,
    playback_sample_rate: u32,
    playback_channels: u32,
    playback_period_size: usize,
}

#[derive(Deserialize)]
struct Session {
    outbound_queue_capacity: usize,
    event_channel_capacity: usize,
    status_channel_capacity: usize,
}

// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 网络配置
    println!("cargo:rustc-env=WS_URL={}", config.network.ws_url);
    println!("cargo:rustc-env=WS_TOKEN={}", config.network.ws_token);
    println!("cargo:rustc-env=CLIENT_ID={}", config.network.client_id);
    println!("cargo:rustc-env=CONNECT_TIMEOUT_MS={}", config.network.connect_timeout_ms);

    // 模型配置
    println!("cargo:rustc-env=MODEL_NAME={}", config.model.name);
    println!("cargo:rustc-env=VOICE_NAME={}", config.model.voice_name);
    println!("cargo:rustc-env=SYSTEM_INSTRUCTION={}", config.model.system_instruction);

    // 音频配置
    println!("cargo:rustc-env=CAPTURE_DEVICE={}", config.audio.capture_device);
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.audio.playback_device);
    println!("cargo:rustc-env=CAPTURE_SAMPLE_RATE={}", config.audio.capture_sample_rate);
    println!("cargo:rustc-env=CAPTURE_FRAME_SAMPLES={}", config.audio.capture_frame_samples);
    println!("cargo:rustc-env=PLAYBACK_SAMPLE_RATE={}", config.audio.playback_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.audio.playback_channels);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.audio.playback_period_size);

    // 会话通道配置
    println!("cargo:rustc-env=OUTBOUND_QUEUE_CAPACITY={}", config.session.outbound_queue_capacity);
    println!("cargo:rustc-env=EVENT_CHANNEL_CAPACITY={}", config.session.event_channel_capacity);
    println!("cargo:rustc-env=STATUS_CHANNEL_CAPACITY={}", config.session.status_channel_capacity);
}
