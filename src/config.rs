use crate::defaults;
use crate::error::{OmniVoiceError, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    pub audio: AudioConfig,
    pub live: LiveConfig,
}

/// Audio device and framing configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub input_device: Option<String>,
    pub output_device: Option<String>,
    pub capture_sample_rate: u32,
    pub playback_sample_rate: u32,
    pub frame_window: usize,
    pub poll_interval_ms: u64,
}

/// Live provider connection configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LiveConfig {
    pub endpoint: String,
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    /// Prefer the environment over writing the key into the file.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_device: None,
            output_device: None,
            capture_sample_rate: defaults::CAPTURE_SAMPLE_RATE,
            playback_sample_rate: defaults::PLAYBACK_SAMPLE_RATE,
            frame_window: defaults::FRAME_WINDOW,
            poll_interval_ms: defaults::CAPTURE_POLL_INTERVAL_MS,
        }
    }
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            endpoint: defaults::LIVE_ENDPOINT.to_string(),
            model: defaults::LIVE_MODEL.to_string(),
            voice: defaults::LIVE_VOICE.to_string(),
            system_instruction: defaults::SYSTEM_INSTRUCTION.to_string(),
            api_key: None,
        }
    }
}

/// Environment variables checked for the API key, in priority order.
pub const API_KEY_VARS: &[&str] = &["OMNIVOICE_API_KEY", "GEMINI_API_KEY", "API_KEY"];

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|value| !value.is_empty())
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Missing fields use default values.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                OmniVoiceError::ConfigFileNotFound {
                    path: path.display().to_string(),
                }
            } else {
                OmniVoiceError::Io(e)
            }
        })?;
        let config: Config = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults only if the file is missing.
    ///
    /// Invalid TOML is still an error.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        match Self::load(path) {
            Err(OmniVoiceError::ConfigFileNotFound { .. }) => Ok(Self::default()),
            other => other,
        }
    }

    /// Apply environment variable overrides
    ///
    /// Supported environment variables:
    /// - OMNIVOICE_MODEL → live.model
    /// - OMNIVOICE_VOICE → live.voice
    /// - OMNIVOICE_INPUT_DEVICE → audio.input_device
    /// - OMNIVOICE_OUTPUT_DEVICE → audio.output_device
    /// - OMNIVOICE_API_KEY, then GEMINI_API_KEY, then API_KEY → live.api_key
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(model) = non_empty_env("OMNIVOICE_MODEL") {
            self.live.model = model;
        }

        if let Some(voice) = non_empty_env("OMNIVOICE_VOICE") {
            self.live.voice = voice;
        }

        if let Some(device) = non_empty_env("OMNIVOICE_INPUT_DEVICE") {
            self.audio.input_device = Some(device);
        }

        if let Some(device) = non_empty_env("OMNIVOICE_OUTPUT_DEVICE") {
            self.audio.output_device = Some(device);
        }

        if let Some(key) = API_KEY_VARS.iter().find_map(|var| non_empty_env(var)) {
            self.live.api_key = Some(key);
        }

        self
    }

    /// Reject values that would make a session impossible.
    pub fn validate(&self) -> Result<()> {
        let invalid = |key: &str, message: &str| {
            Err(OmniVoiceError::ConfigInvalidValue {
                key: key.to_string(),
                message: message.to_string(),
            })
        };
        if self.audio.capture_sample_rate == 0 {
            return invalid("audio.capture_sample_rate", "must be greater than zero");
        }
        if self.audio.playback_sample_rate == 0 {
            return invalid("audio.playback_sample_rate", "must be greater than zero");
        }
        if self.audio.frame_window == 0 {
            return invalid("audio.frame_window", "must be greater than zero");
        }
        if self.live.model.trim().is_empty() {
            return invalid("live.model", "must not be empty");
        }
        if !self.live.endpoint.starts_with("ws://") && !self.live.endpoint.starts_with("wss://") {
            return invalid("live.endpoint", "must be a ws:// or wss:// URL");
        }
        Ok(())
    }

    /// Render as TOML, for `config show` and `config init`.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| OmniVoiceError::ConfigParse {
            message: e.to_string(),
        })
    }

    /// Get the default configuration file path
    ///
    /// Returns ~/.config/omnivoice/config.toml on Linux
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("omnivoice").join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::sync::Mutex;
    use tempfile::NamedTempFile;

    // Mutex to serialize tests that modify environment variables
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    // SAFETY: These helpers are only used in tests with ENV_LOCK held,
    // ensuring no concurrent access to environment variables.
    fn set_env(key: &str, value: &str) {
        unsafe { std::env::set_var(key, value) }
    }

    fn remove_env(key: &str) {
        unsafe { std::env::remove_var(key) }
    }

    fn clear_omnivoice_env() {
        for key in [
            "OMNIVOICE_MODEL",
            "OMNIVOICE_VOICE",
            "OMNIVOICE_INPUT_DEVICE",
            "OMNIVOICE_OUTPUT_DEVICE",
        ]
        .iter()
        .chain(API_KEY_VARS)
        {
            remove_env(key);
        }
    }

    #[test]
    fn test_default_config_has_correct_values() {
        let config = Config::default();

        assert_eq!(config.audio.input_device, None);
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.audio.playback_sample_rate, 24000);
        assert_eq!(config.audio.frame_window, 4096);
        assert_eq!(config.audio.poll_interval_ms, 20);

        assert_eq!(
            config.live.model,
            "gemini-2.5-flash-native-audio-preview-12-2025"
        );
        assert_eq!(config.live.voice, "Puck");
        assert!(config.live.endpoint.starts_with("wss://"));
        assert_eq!(config.live.api_key, None);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_toml_file() {
        let toml_content = r#"
            [audio]
            input_device = "hw:0,0"
            frame_window = 2048

            [live]
            voice = "Kore"
        "#;

        let mut file = NamedTempFile::new().unwrap();
        file.write_all(toml_content.as_bytes()).unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.audio.input_device.as_deref(), Some("hw:0,0"));
        assert_eq!(config.audio.frame_window, 2048);
        assert_eq!(config.audio.capture_sample_rate, 16000);
        assert_eq!(config.live.voice, "Kore");
        assert_eq!(config.live.model, defaults::LIVE_MODEL);
    }

    #[test]
    fn test_load_missing_file() {
        let result = Config::load(Path::new("/nonexistent/omnivoice/config.toml"));
        assert!(matches!(
            result,
            Err(OmniVoiceError::ConfigFileNotFound { .. })
        ));

        let config = Config::load_or_default(Path::new("/nonexistent/omnivoice/config.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_toml_is_an_error_even_with_default_fallback() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[audio\nframe_window = ").unwrap();

        assert!(matches!(
            Config::load_or_default(file.path()),
            Err(OmniVoiceError::Config(_))
        ));
    }

    #[test]
    fn test_wrong_type_is_an_error() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"[audio]\nframe_window = \"big\"\n").unwrap();
        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_omnivoice_env();

        set_env("OMNIVOICE_MODEL", "other-model");
        set_env("OMNIVOICE_VOICE", "Charon");
        set_env("OMNIVOICE_INPUT_DEVICE", "pipewire");
        set_env("OMNIVOICE_OUTPUT_DEVICE", "speakers");

        let config = Config::default().with_env_overrides();
        assert_eq!(config.live.model, "other-model");
        assert_eq!(config.live.voice, "Charon");
        assert_eq!(config.audio.input_device.as_deref(), Some("pipewire"));
        assert_eq!(config.audio.output_device.as_deref(), Some("speakers"));

        clear_omnivoice_env();
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_omnivoice_env();

        set_env("OMNIVOICE_MODEL", "");
        let config = Config::default().with_env_overrides();
        assert_eq!(config.live.model, defaults::LIVE_MODEL);

        clear_omnivoice_env();
    }

    #[test]
    fn test_api_key_fallback_order() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_omnivoice_env();

        set_env("API_KEY", "generic");
        assert_eq!(
            Config::default().with_env_overrides().live.api_key.as_deref(),
            Some("generic")
        );

        set_env("GEMINI_API_KEY", "gemini");
        assert_eq!(
            Config::default().with_env_overrides().live.api_key.as_deref(),
            Some("gemini")
        );

        set_env("OMNIVOICE_API_KEY", "omni");
        assert_eq!(
            Config::default().with_env_overrides().live.api_key.as_deref(),
            Some("omni")
        );

        clear_omnivoice_env();
    }

    #[test]
    fn test_validate_rejects_unusable_values() {
        let mut config = Config::default();
        config.audio.frame_window = 0;
        match config.validate() {
            Err(OmniVoiceError::ConfigInvalidValue { key, .. }) => {
                assert_eq!(key, "audio.frame_window")
            }
            other => panic!("Expected ConfigInvalidValue, got {other:?}"),
        }

        let mut config = Config::default();
        config.live.model = "  ".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.live.endpoint = "https://example.com".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.audio.capture_sample_rate = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip_omits_missing_key() {
        let config = Config::default();
        let rendered = config.to_toml().unwrap();
        assert!(!rendered.contains("api_key"));
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_default_path_ends_with_app_dir() {
        if let Some(path) = Config::default_path() {
            assert!(path.ends_with("omnivoice/config.toml"));
        }
    }
}
