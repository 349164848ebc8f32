use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Consecutive identical counts required before a detector change is confirmed.
pub const DEFAULT_DEBOUNCE_WINDOW: usize = 5;
/// Seconds without actuator activity before the drivers are put to sleep.
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub detection: DetectionConfig,
    pub actuator: ActuatorConfig,
    pub modes: ModesConfig,
    pub events: EventsConfig,
    pub voice: VoiceConfig,
    pub llm: LlmConfig,
    pub speech: SpeechConfig,
    pub audio: AudioConfig,
    pub sensors: SensorsConfig,
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub timeouts: TimeoutsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CameraConfig {
    #[serde(default = "default_camera_device")]
    pub device: String,
    #[serde(default = "default_camera_width")]
    pub width: u32,
    #[serde(default = "default_camera_height")]
    pub height: u32,
    #[serde(default = "default_camera_retry_ms")]
    pub retry_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: default_camera_device(),
            width: default_camera_width(),
            height: default_camera_height(),
            retry_ms: default_camera_retry_ms(),
        }
    }
}

fn default_camera_device() -> String {
    "/dev/video0".to_string()
}
fn default_camera_width() -> u32 {
    640
}
fn default_camera_height() -> u32 {
    480
}
fn default_camera_retry_ms() -> u64 {
    50
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DetectionConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_debounce_window")]
    pub debounce_window: usize,
    #[serde(default = "default_face_detector")]
    pub face: DetectorConfig,
    #[serde(default = "default_danger_detector")]
    pub danger: DetectorConfig,
    #[serde(default = "default_fire_alarm_confidence")]
    pub fire_alarm_confidence: f32,
    #[serde(default = "default_fire_alarm_cooldown_secs")]
    pub fire_alarm_cooldown_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            debounce_window: default_debounce_window(),
            face: default_face_detector(),
            danger: default_danger_detector(),
            fire_alarm_confidence: default_fire_alarm_confidence(),
            fire_alarm_cooldown_secs: default_fire_alarm_cooldown_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct DetectorConfig {
    pub endpoint: String,
    /// Run the detector on every N-th poll tick.
    #[serde(default = "default_cadence")]
    pub cadence: u32,
    #[serde(default)]
    pub min_confidence: f32,
}

fn default_poll_interval_ms() -> u64 {
    50
}
fn default_debounce_window() -> usize {
    DEFAULT_DEBOUNCE_WINDOW
}
fn default_cadence() -> u32 {
    5
}
fn default_face_detector() -> DetectorConfig {
    DetectorConfig {
        endpoint: "http://127.0.0.1:8500/detect/face".to_string(),
        cadence: default_cadence(),
        min_confidence: 0.0,
    }
}
fn default_danger_detector() -> DetectorConfig {
    DetectorConfig {
        endpoint: "http://127.0.0.1:8500/detect/danger".to_string(),
        cadence: default_cadence(),
        min_confidence: 0.3,
    }
}
fn default_fire_alarm_confidence() -> f32 {
    0.8
}
fn default_fire_alarm_cooldown_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ActuatorConfig {
    #[serde(default = "default_actuator_driver")]
    pub driver: String,
    #[serde(default = "default_h_min")]
    pub h_min: i32,
    #[serde(default = "default_h_max")]
    pub h_max: i32,
    #[serde(default = "default_v_min")]
    pub v_min: i32,
    #[serde(default = "default_v_max")]
    pub v_max: i32,
    /// Maps image-space direction to actuator direction; -1 for an inverted mount.
    #[serde(default = "default_h_sign")]
    pub h_sign: i32,
    #[serde(default = "default_v_sign")]
    pub v_sign: i32,
    #[serde(default = "default_step_unit")]
    pub step_unit: i32,
    #[serde(default = "default_dead_zone")]
    pub dead_zone: u32,
    #[serde(default = "default_max_steps")]
    pub max_steps: i32,
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    #[serde(default = "default_h_max")]
    pub park_h: i32,
    #[serde(default = "default_v_min")]
    pub park_v: i32,
    #[serde(default = "default_h_pins")]
    pub h_pins: [u32; 4],
    #[serde(default = "default_v_pins")]
    pub v_pins: [u32; 4],
    #[serde(default = "default_step_delay_us")]
    pub step_delay_us: u64,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            driver: default_actuator_driver(),
            h_min: default_h_min(),
            h_max: default_h_max(),
            v_min: default_v_min(),
            v_max: default_v_max(),
            h_sign: default_h_sign(),
            v_sign: default_v_sign(),
            step_unit: default_step_unit(),
            dead_zone: default_dead_zone(),
            max_steps: default_max_steps(),
            idle_timeout_secs: default_idle_timeout_secs(),
            park_h: default_h_max(),
            park_v: default_v_min(),
            h_pins: default_h_pins(),
            v_pins: default_v_pins(),
            step_delay_us: default_step_delay_us(),
        }
    }
}

impl ActuatorConfig {
    /// Rejects direction signs other than 1 or -1.
    pub fn validate(&self) -> Result<()> {
        for (name, sign) in [("h_sign", self.h_sign), ("v_sign", self.v_sign)] {
            if sign != 1 && sign != -1 {
                anyhow::bail!("actuator.{} must be 1 or -1, got {}", name, sign);
            }
        }
        Ok(())
    }
}

fn default_actuator_driver() -> String {
    "log".to_string()
}
fn default_h_min() -> i32 {
    -175
}
fn default_h_max() -> i32 {
    175
}
fn default_v_min() -> i32 {
    -65
}
fn default_v_max() -> i32 {
    65
}
fn default_h_sign() -> i32 {
    1
}
fn default_v_sign() -> i32 {
    -1
}
fn default_step_unit() -> i32 {
    5
}
fn default_dead_zone() -> u32 {
    80
}
fn default_max_steps() -> i32 {
    5
}
fn default_idle_timeout_secs() -> u64 {
    DEFAULT_IDLE_TIMEOUT_SECS
}
fn default_h_pins() -> [u32; 4] {
    [3, 4, 6, 9]
}
fn default_v_pins() -> [u32; 4] {
    [10, 13, 15, 16]
}
fn default_step_delay_us() -> u64 {
    1000
}

/// Mode flags at process start.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ModesConfig {
    #[serde(default)]
    pub face_detection: bool,
    #[serde(default)]
    pub face_tracking: bool,
    #[serde(default)]
    pub danger_detection: bool,
    #[serde(default = "default_true")]
    pub face_overlay: bool,
    #[serde(default = "default_true")]
    pub voice_wake: bool,
}

impl Default for ModesConfig {
    fn default() -> Self {
        Self {
            face_detection: false,
            face_tracking: false,
            danger_detection: false,
            face_overlay: true,
            voice_wake: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct EventsConfig {
    #[serde(default)]
    pub db_path: Option<String>,
}

impl EventsConfig {
    pub fn resolved_path(&self) -> PathBuf {
        match &self.db_path {
            Some(path) => PathBuf::from(path),
            None => data_dir().join("events.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct VoiceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_wake_words")]
    pub wake_words: Vec<String>,
    #[serde(default = "default_record_secs")]
    pub record_secs: u32,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: u32,
    #[serde(default = "default_vad_threshold")]
    pub vad_threshold: f32,
    #[serde(default = "default_wake_silence_ms")]
    pub wake_silence_ms: u32,
    #[serde(default = "default_max_wake_ms")]
    pub max_wake_ms: u32,
    #[serde(default)]
    pub recording_path: Option<String>,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: String,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            wake_words: default_wake_words(),
            record_secs: default_record_secs(),
            sample_rate: default_sample_rate(),
            vad_threshold: default_vad_threshold(),
            wake_silence_ms: default_wake_silence_ms(),
            max_wake_ms: default_max_wake_ms(),
            recording_path: None,
            assets_dir: default_assets_dir(),
        }
    }
}

impl VoiceConfig {
    pub fn resolved_recording_path(&self) -> PathBuf {
        match &self.recording_path {
            Some(path) => PathBuf::from(path),
            None => data_dir().join("voice_cmd.wav"),
        }
    }
}

fn default_wake_words() -> Vec<String> {
    vec!["sentry".to_string(), "哨兵".to_string()]
}
fn default_record_secs() -> u32 {
    5
}
fn default_sample_rate() -> u32 {
    16000
}
fn default_vad_threshold() -> f32 {
    0.02
}
fn default_wake_silence_ms() -> u32 {
    500
}
fn default_max_wake_ms() -> u32 {
    3000
}
fn default_assets_dir() -> String {
    "assets".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LlmConfig {
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default = "default_llm_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_llm_temperature")]
    pub temperature: f32,
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            model: default_llm_model(),
            api_key_env: default_llm_api_key_env(),
            temperature: default_llm_temperature(),
            max_tokens: default_llm_max_tokens(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://api.deepseek.com/v1".to_string()
}
fn default_llm_model() -> String {
    "deepseek-chat".to_string()
}
fn default_llm_api_key_env() -> String {
    "SENTRY_LLM_API_KEY".to_string()
}
fn default_llm_temperature() -> f32 {
    0.7
}
fn default_llm_max_tokens() -> u32 {
    2000
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SpeechConfig {
    /// `http` or `whisper` (requires the `whisper` cargo feature).
    #[serde(default = "default_speech_engine")]
    pub engine: String,
    #[serde(default = "default_speech_base_url")]
    pub base_url: String,
    #[serde(default = "default_speech_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_tts_model")]
    pub tts_model: String,
    #[serde(default = "default_tts_voice")]
    pub tts_voice: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default = "default_model_url")]
    pub model_url: String,
    #[serde(default)]
    pub model_checksum: Option<String>,
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_min_audio_samples")]
    pub min_audio_samples: usize,
    #[serde(default = "default_sampling_strategy")]
    pub sampling_strategy: String,
}

impl Default for SpeechConfig {
    fn default() -> Self {
        Self {
            engine: default_speech_engine(),
            base_url: default_speech_base_url(),
            api_key_env: default_speech_api_key_env(),
            stt_model: default_stt_model(),
            tts_model: default_tts_model(),
            tts_voice: default_tts_voice(),
            language: default_language(),
            model_url: default_model_url(),
            model_checksum: None,
            backend: default_backend(),
            min_audio_samples: default_min_audio_samples(),
            sampling_strategy: default_sampling_strategy(),
        }
    }
}

fn default_speech_engine() -> String {
    "http".to_string()
}
fn default_speech_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_speech_api_key_env() -> String {
    "SENTRY_SPEECH_API_KEY".to_string()
}
fn default_stt_model() -> String {
    "whisper-1".to_string()
}
fn default_tts_model() -> String {
    "tts-1".to_string()
}
fn default_tts_voice() -> String {
    "alloy".to_string()
}
fn default_language() -> String {
    "zh".to_string()
}
fn default_model_url() -> String {
    "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin".to_string()
}
fn default_backend() -> String {
    "cpu".to_string()
}
fn default_min_audio_samples() -> usize {
    18000
}
fn default_sampling_strategy() -> String {
    "greedy".to_string()
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct AudioConfig {
    #[serde(default = "default_volume")]
    pub volume: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: default_volume(),
        }
    }
}

fn default_volume() -> f32 {
    0.05
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SensorsConfig {
    #[serde(default)]
    pub temperature_path: Option<String>,
    #[serde(default)]
    pub humidity_path: Option<String>,
    /// Multiplier applied to the raw integer read from each file.
    #[serde(default = "default_sensor_scale")]
    pub scale: f32,
    #[serde(default = "default_sensor_poll_secs")]
    pub poll_interval_secs: u64,
}

impl Default for SensorsConfig {
    fn default() -> Self {
        Self {
            temperature_path: None,
            humidity_path: None,
            scale: default_sensor_scale(),
            poll_interval_secs: default_sensor_poll_secs(),
        }
    }
}

fn default_sensor_scale() -> f32 {
    0.001
}
fn default_sensor_poll_secs() -> u64 {
    5
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Default)]
pub struct ServerConfig {
    #[serde(default)]
    pub socket_path: Option<String>,
}

impl ServerConfig {
    pub fn resolved_socket_path(&self) -> PathBuf {
        match &self.socket_path {
            Some(path) => PathBuf::from(path),
            None => dirs::runtime_dir()
                .map(|dir| dir.join("sentryd.sock"))
                .unwrap_or_else(|| PathBuf::from("/tmp/sentryd.sock")),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RateLimitConfig {
    #[serde(default = "default_commands_per_second")]
    pub commands_per_second: u32,
    #[serde(default = "default_burst_capacity")]
    pub burst_capacity: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            commands_per_second: default_commands_per_second(),
            burst_capacity: default_burst_capacity(),
            enabled: true,
        }
    }
}

fn default_commands_per_second() -> u32 {
    10
}
fn default_burst_capacity() -> u32 {
    20
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TimeoutsConfig {
    #[serde(default = "default_http_timeout")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_detector_timeout_ms")]
    pub detector_timeout_ms: u64,
    #[serde(default = "default_socket_operation_timeout")]
    pub socket_operation_timeout_seconds: u64,
    #[serde(default = "default_model_download_timeout")]
    pub model_download_timeout_seconds: u64,
}

impl Default for TimeoutsConfig {
    fn default() -> Self {
        Self {
            http_timeout_seconds: default_http_timeout(),
            detector_timeout_ms: default_detector_timeout_ms(),
            socket_operation_timeout_seconds: default_socket_operation_timeout(),
            model_download_timeout_seconds: default_model_download_timeout(),
        }
    }
}

fn default_http_timeout() -> u64 {
    30
}
fn default_detector_timeout_ms() -> u64 {
    2000
}
fn default_socket_operation_timeout() -> u64 {
    10
}
fn default_model_download_timeout() -> u64 {
    300
}

/// Directory for the event database and voice recordings.
pub fn data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentry")
}

pub fn load_config() -> Result<Config> {
    let config_path = get_config_path();

    if !config_path.exists() {
        tracing::info!("Config file not found at {:?}, using defaults", config_path);
        return Ok(Config::default());
    }

    load_config_from(&config_path)
}

pub fn load_config_from(config_path: &std::path::Path) -> Result<Config> {
    tracing::info!("Loading config from {:?}", config_path);
    let config_str = std::fs::read_to_string(config_path)
        .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

    let config: Config = toml::from_str(&config_str)
        .map_err(|e| anyhow::anyhow!("Failed to parse config file: {}", e))?;
    config.actuator.validate()?;

    tracing::info!("Config loaded successfully");
    Ok(config)
}

fn get_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sentry")
        .join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.camera.device, "/dev/video0");
        assert_eq!(config.camera.width, 640);
        assert_eq!(config.camera.height, 480);

        assert_eq!(config.detection.poll_interval_ms, 50);
        assert_eq!(config.detection.debounce_window, DEFAULT_DEBOUNCE_WINDOW);
        assert_eq!(config.detection.face.cadence, 5);
        assert_eq!(config.detection.danger.min_confidence, 0.3);
        assert_eq!(config.detection.fire_alarm_confidence, 0.8);
        assert_eq!(config.detection.fire_alarm_cooldown_secs, 10);

        assert_eq!(config.actuator.h_min, -175);
        assert_eq!(config.actuator.h_max, 175);
        assert_eq!(config.actuator.v_min, -65);
        assert_eq!(config.actuator.v_max, 65);
        assert_eq!(config.actuator.v_sign, -1);
        assert_eq!(config.actuator.step_unit, 5);
        assert_eq!(config.actuator.dead_zone, 80);
        assert_eq!(config.actuator.idle_timeout_secs, DEFAULT_IDLE_TIMEOUT_SECS);
        assert_eq!(config.actuator.park_h, 175);
        assert_eq!(config.actuator.park_v, -65);

        assert!(!config.modes.face_tracking);
        assert!(config.modes.face_overlay);
        assert!(config.modes.voice_wake);

        assert_eq!(config.voice.record_secs, 5);
        assert_eq!(config.voice.sample_rate, 16000);
        assert_eq!(config.llm.model, "deepseek-chat");
        assert_eq!(config.speech.engine, "http");
        assert_eq!(config.audio.volume, 0.05);

        assert_eq!(config.rate_limit.commands_per_second, 10);
        assert_eq!(config.rate_limit.burst_capacity, 20);
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_config_toml_round_trip() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: Config = toml::from_str(&toml_str).unwrap();

        assert_eq!(config, parsed);
        assert!(toml_str.contains("[actuator]"));
        assert!(toml_str.contains("[detection.face]"));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let parsed: Config = toml::from_str("").unwrap();
        assert_eq!(parsed, Config::default());
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let toml_str = r#"
            [actuator]
            idle_timeout_secs = 60
            dead_zone = 40

            [detection]
            debounce_window = 3

            [detection.danger]
            endpoint = "http://detector.local/danger"
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.actuator.idle_timeout_secs, 60);
        assert_eq!(config.actuator.dead_zone, 40);
        assert_eq!(config.actuator.h_max, 175);
        assert_eq!(config.detection.debounce_window, 3);
        assert_eq!(config.detection.danger.endpoint, "http://detector.local/danger");
        assert_eq!(config.detection.danger.cadence, 5);
        assert_eq!(config.detection.face, default_face_detector());
        assert_eq!(config.camera, CameraConfig::default());
    }

    #[test]
    fn test_config_with_invalid_toml() {
        let result: Result<Config, _> = toml::from_str("[actuator\nh_min = ");
        assert!(result.is_err());
    }

    #[test]
    fn test_config_with_invalid_types() {
        let toml_str = r#"
            [actuator]
            h_min = "far left"
        "#;
        let result: Result<Config, _> = toml::from_str(toml_str);
        assert!(result.is_err());
    }

    #[test]
    fn test_explicit_paths_override_defaults() {
        let toml_str = r#"
            [events]
            db_path = "/var/lib/sentry/events.db"

            [server]
            socket_path = "/run/sentryd.sock"
        "#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.events.resolved_path(),
            PathBuf::from("/var/lib/sentry/events.db")
        );
        assert_eq!(
            config.server.resolved_socket_path(),
            PathBuf::from("/run/sentryd.sock")
        );
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[audio]\nvolume = 0.5\n").unwrap();

        let config = load_config_from(&path).unwrap();
        assert_eq!(config.audio.volume, 0.5);
    }

    #[test]
    fn test_load_config_rejects_bad_mount_signs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        for body in ["[actuator]\nh_sign = 0\n", "[actuator]\nv_sign = 2\n"] {
            std::fs::write(&path, body).unwrap();
            let err = load_config_from(&path).unwrap_err();
            assert!(err.to_string().contains("must be 1 or -1"), "{}", err);
        }

        std::fs::write(&path, "[actuator]\nh_sign = -1\nv_sign = 1\n").unwrap();
        let config = load_config_from(&path).unwrap();
        assert_eq!((config.actuator.h_sign, config.actuator.v_sign), (-1, 1));
    }
}
