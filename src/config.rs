use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::session::ExerciseType;

/// デフォルトの設定ファイル
pub const DEFAULT_CONFIG_PATH: &str = "liftmate.toml";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub camera: CameraConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
    #[serde(default)]
    pub overlay: OverlayConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    /// カメラデバイス番号
    #[serde(default)]
    pub index: i32,
    /// 要求する横解像度
    #[serde(default = "default_camera_width")]
    pub width: u32,
    /// 要求する縦解像度
    #[serde(default = "default_camera_height")]
    pub height: u32,
    /// JPEG品質 (1〜100)
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// 解析サーバーのベースURL
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// 1リクエストあたりのタイムアウト（ミリ秒）
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// 定期キャプチャの間隔（ミリ秒）
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    /// 初期の種目
    #[serde(default)]
    pub exercise: ExerciseType,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OverlayConfig {
    /// 骨格オーバーレイの幅
    #[serde(default = "default_overlay_width")]
    pub width: u32,
    /// 骨格オーバーレイの高さ
    #[serde(default = "default_overlay_height")]
    pub height: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// RUST_LOG 未設定時のログレベル
    #[serde(default = "default_log_level")]
    pub level: String,
    /// logs/ 以下にもログを書き出す
    #[serde(default)]
    pub file: bool,
}

fn default_camera_width() -> u32 { 640 }
fn default_camera_height() -> u32 { 480 }
fn default_jpeg_quality() -> u8 { 80 }
fn default_base_url() -> String { "http://localhost:5000".to_string() }
fn default_timeout_ms() -> u64 { 10_000 }
fn default_interval_ms() -> u64 { 1_000 }
fn default_overlay_width() -> u32 { 300 }
fn default_overlay_height() -> u32 { 400 }
fn default_log_level() -> String { "info".to_string() }

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            index: 0,
            width: default_camera_width(),
            height: default_camera_height(),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            exercise: ExerciseType::default(),
        }
    }
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            width: default_overlay_width(),
            height: default_overlay_height(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: false,
        }
    }
}

impl ServerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl CaptureConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.max(1))
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid config {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// 読み込みに失敗したらデフォルト値で続行
    ///
    /// ロガーの設定自体がここで決まるため、失敗理由はログに出さずに返す。
    /// 呼び出し側がロガー初期化後に警告する。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load(&path) {
            Ok(config) => (config, None),
            Err(e) => (Self::default(), Some(e)),
        }
    }
}
