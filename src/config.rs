use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub twilio: TwilioConfig,
    pub openai: OpenAiConfig,
    pub elevenlabs: ElevenLabsConfig,
    #[serde(default)]
    pub gemini: GeminiConfig,
    pub supabase: SupabaseConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub call: CallConfig,
    #[serde(default)]
    pub outreach: OutreachConfig,
    #[serde(default)]
    pub api: ApiConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Public https base that Twilio can reach; used in TwiML callbacks and audio URLs.
    pub external_url: String,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8443
}

#[derive(Debug, Deserialize, Clone)]
pub struct TwilioConfig {
    pub account_sid: String,
    pub auth_token: String,
    pub phone_number: String,
    #[serde(default = "default_twilio_base")]
    pub api_base: String,
    #[serde(default = "default_true")]
    pub validate_signatures: bool,
}

fn default_twilio_base() -> String {
    "https://api.twilio.com".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    pub api_key: String,
    #[serde(default = "default_openai_base")]
    pub base_url: String,
    #[serde(default = "default_chat_model")]
    pub chat_model: String,
    #[serde(default = "default_stt_model")]
    pub stt_model: String,
    #[serde(default = "default_realtime_model")]
    pub realtime_model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_openai_base() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_chat_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_stt_model() -> String {
    "whisper-1".to_string()
}

fn default_realtime_model() -> String {
    "gpt-4o-realtime-preview".to_string()
}

fn default_max_tokens() -> u32 {
    150
}

fn default_temperature() -> f32 {
    0.7
}

#[derive(Debug, Deserialize, Clone)]
pub struct ElevenLabsConfig {
    pub api_key: String,
    #[serde(default = "default_elevenlabs_base")]
    pub base_url: String,
    #[serde(default = "default_voice_id")]
    pub voice_id: String,
    #[serde(default = "default_tts_model")]
    pub model_id: String,
    #[serde(default = "default_stability")]
    pub stability: f32,
    #[serde(default = "default_similarity_boost")]
    pub similarity_boost: f32,
}

fn default_elevenlabs_base() -> String {
    "https://api.elevenlabs.io".to_string()
}

fn default_voice_id() -> String {
    "EXAVITQu4vr4xnSDxMaL".to_string()
}

fn default_tts_model() -> String {
    "eleven_turbo_v2_5".to_string()
}

fn default_stability() -> f32 {
    0.5
}

fn default_similarity_boost() -> f32 {
    0.75
}

#[derive(Debug, Deserialize, Clone)]
pub struct GeminiConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_gemini_base")]
    pub base_url: String,
    #[serde(default = "default_gemini_model")]
    pub model: String,
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            base_url: default_gemini_base(),
            model: default_gemini_model(),
        }
    }
}

fn default_gemini_base() -> String {
    "https://generativelanguage.googleapis.com".to_string()
}

fn default_gemini_model() -> String {
    "gemini-1.5-flash".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub service_key: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default = "default_assistant_name")]
    pub name: String,
    /// Fixed greeting. Empty means a time-of-day greeting is generated per call.
    #[serde(default)]
    pub greeting: String,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            name: default_assistant_name(),
            greeting: String::new(),
        }
    }
}

fn default_assistant_name() -> String {
    "Clara".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct CallConfig {
    #[serde(default = "default_max_record_secs")]
    pub max_record_secs: u32,
    #[serde(default = "default_silence_timeout")]
    pub silence_timeout_secs: u32,
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    #[serde(default = "default_audio_ttl")]
    pub audio_ttl_secs: u64,
}

impl Default for CallConfig {
    fn default() -> Self {
        Self {
            max_record_secs: default_max_record_secs(),
            silence_timeout_secs: default_silence_timeout(),
            session_timeout_secs: default_session_timeout(),
            max_history: default_max_history(),
            audio_ttl_secs: default_audio_ttl(),
        }
    }
}

fn default_max_record_secs() -> u32 {
    30
}

fn default_silence_timeout() -> u32 {
    3
}

fn default_session_timeout() -> u64 {
    1800
}

fn default_max_history() -> usize {
    20
}

fn default_audio_ttl() -> u64 {
    600
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutreachConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before a retrying job becomes due again. 0 retries on the next run.
    #[serde(default)]
    pub retry_delay_secs: u64,
    /// Background poll interval. 0 disables the poller.
    #[serde(default)]
    pub poll_interval_secs: u64,
}

impl Default for OutreachConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            retry_delay_secs: 0,
            poll_interval_secs: 0,
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_max_attempts() -> u32 {
    2
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct ApiConfig {
    /// Bearer token required for /api/* endpoints. If empty, all requests are rejected.
    #[serde(default)]
    pub token: String,
    /// Dashboard origins allowed by CORS. Empty allows any origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        // Load .env file from same directory as config.toml
        let env_path = config_dir().join(".env");
        match dotenvy::from_path(&env_path) {
            Ok(()) => tracing::info!("Loaded .env from {}", env_path.display()),
            Err(dotenvy::Error::Io(_)) => {
                tracing::debug!(
                    "No .env file at {}, using environment only",
                    env_path.display()
                );
            }
            Err(e) => tracing::warn!("Failed to parse .env: {e}"),
        }

        let path = config_path();
        tracing::info!("Loading config from {}", path.display());

        let contents = std::fs::read_to_string(&path).map_err(|e| {
            format!(
                "Failed to read config at {}: {}. Copy config.example.toml to {}",
                path.display(),
                e,
                path.display()
            )
        })?;

        let mut config = Self::from_toml(&contents)?;
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Secrets may come from the environment instead of the TOML file.
    fn apply_env_overrides(&mut self, var: impl Fn(&str) -> Option<String>) {
        let targets: [(&str, &mut String); 9] = [
            ("TWILIO_ACCOUNT_SID", &mut self.twilio.account_sid),
            ("TWILIO_AUTH_TOKEN", &mut self.twilio.auth_token),
            ("OPENAI_API_KEY", &mut self.openai.api_key),
            ("ELEVENLABS_API_KEY", &mut self.elevenlabs.api_key),
            ("GEMINI_API_KEY", &mut self.gemini.api_key),
            ("SUPABASE_URL", &mut self.supabase.url),
            ("SUPABASE_SERVICE_ROLE_KEY", &mut self.supabase.service_key),
            ("CLARA_API_TOKEN", &mut self.api.token),
            ("SERVER_EXTERNAL_URL", &mut self.server.external_url),
        ];
        for (key, slot) in targets {
            if let Some(v) = var(key) {
                *slot = v;
            }
        }
    }
}

fn config_dir() -> PathBuf {
    if let Ok(p) = std::env::var("CLARA_CONFIG") {
        // If pointing to a file, use its parent directory
        let path = PathBuf::from(p);
        return path.parent().map(|p| p.to_path_buf()).unwrap_or(path);
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    PathBuf::from(home).join(".clara")
}

fn config_path() -> PathBuf {
    if let Ok(p) = std::env::var("CLARA_CONFIG") {
        return PathBuf::from(p);
    }

    config_dir().join("config.toml")
}
