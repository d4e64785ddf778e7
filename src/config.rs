use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::audio::PcmFormat;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 网络配置
    pub ws_url: String,
    pub ws_token: String,
    pub client_id: String,
    pub connect_timeout_ms: u64,

    // 模型参数，随 setup 消息发送
    pub model: String,
    pub voice_name: String,
    pub system_instruction: String,

    // 音频设备配置
    pub capture_device: String,
    pub playback_device: String,
    pub capture_sample_rate: u32,
    pub capture_frame_samples: usize,
    pub playback_sample_rate: u32,
    pub playback_channels: u32,
    pub playback_period_size: usize,

    // 通道容量
    pub outbound_queue_capacity: usize,
    pub event_channel_capacity: usize,
    pub status_channel_capacity: usize,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            ws_url: env!("WS_URL").to_string(),
            ws_token: env!("WS_TOKEN").to_string(),
            client_id: env!("CLIENT_ID").to_string(),
            connect_timeout_ms: env!("CONNECT_TIMEOUT_MS").parse()
                .map_err(|_| "Failed to parse CONNECT_TIMEOUT_MS")?,

            model: env!("MODEL_NAME").to_string(),
            voice_name: env!("VOICE_NAME").to_string(),
            system_instruction: env!("SYSTEM_INSTRUCTION").to_string(),

            capture_device: env!("CAPTURE_DEVICE").to_string(),
            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            capture_sample_rate: env!("CAPTURE_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse CAPTURE_SAMPLE_RATE")?,
            capture_frame_samples: env!("CAPTURE_FRAME_SAMPLES").parse()
                .map_err(|_| "Failed to parse CAPTURE_FRAME_SAMPLES")?,
            playback_sample_rate: env!("PLAYBACK_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_SAMPLE_RATE")?,
            playback_channels: env!("PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,

            outbound_queue_capacity: env!("OUTBOUND_QUEUE_CAPACITY").parse()
                .map_err(|_| "Failed to parse OUTBOUND_QUEUE_CAPACITY")?,
            event_channel_capacity: env!("EVENT_CHANNEL_CAPACITY").parse()
                .map_err(|_| "Failed to parse EVENT_CHANNEL_CAPACITY")?,
            status_channel_capacity: env!("STATUS_CHANNEL_CAPACITY").parse()
                .map_err(|_| "Failed to parse STATUS_CHANNEL_CAPACITY")?,
        })
    }

    /// Outbound (microphone) stream format.
    pub fn capture_format(&self) -> PcmFormat {
        PcmFormat::mono(self.capture_sample_rate)
    }

    /// Inbound (speaker) stream format.
    pub fn playback_format(&self) -> PcmFormat {
        PcmFormat::mono(self.playback_sample_rate)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
