use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,
    pub history: HistoryConfig,
    pub knowledge_graph: KnowledgeGraphConfig,
    pub workflow: WorkflowConfig,
    pub sequence: SequenceConfig,
    pub privacy: PrivacyConfig,
    pub pcd: PcdConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
    #[serde(skip)]
    socket_override: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub disable_learning: bool,
    pub log_level: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub history_size: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KnowledgeGraphConfig {
    pub max_commands: usize,
    pub max_args_per_cmd: usize,
    pub decay_days: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub workflow_learning: bool,
    pub workflow_min_frequency: u64,
    pub workflow_max_time_delta_minutes: u64,
    pub workflow_min_confidence: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    pub ml_enabled: bool,
    pub ml_ngram_order: usize,
    pub ml_ngram_min_freq: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrivacyConfig {
    pub ignore_patterns: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PcdConfig {
    pub frequency_weight: f64,
    pub recency_weight: f64,
    pub distance_weight: f64,
    pub exact_match_boost: f64,
    pub fuzzy_min_match_pct: f64,
    pub long_query_lcs_pct: f64,
    pub max_depth_tab: usize,
    pub max_depth_predictor: usize,
    pub recursive_search: bool,
    pub enable_dot_dir_filter: bool,
    pub custom_blocklist: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub data_dir: Option<String>,
    pub busy_timeout_ms: u64,
    pub auto_save_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_file: Option<String>,
    pub max_log_size_mb: u64,
}

// --- Defaults ---

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            history: HistoryConfig::default(),
            knowledge_graph: KnowledgeGraphConfig::default(),
            workflow: WorkflowConfig::default(),
            sequence: SequenceConfig::default(),
            privacy: PrivacyConfig::default(),
            pcd: PcdConfig::default(),
            persistence: PersistenceConfig::default(),
            logging: LoggingConfig::default(),
            socket_override: None,
        }
    }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            disable_learning: false,
            log_level: "warn".into(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { history_size: 100 }
    }
}

impl Default for KnowledgeGraphConfig {
    fn default() -> Self {
        Self {
            max_commands: 500,
            max_args_per_cmd: 100,
            decay_days: 30.0,
        }
    }
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            workflow_learning: true,
            workflow_min_frequency: 5,
            workflow_max_time_delta_minutes: 15,
            workflow_min_confidence: 0.6,
        }
    }
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            ml_enabled: true,
            ml_ngram_order: 2,
            ml_ngram_min_freq: 3,
        }
    }
}

impl Default for PrivacyConfig {
    fn default() -> Self {
        Self {
            ignore_patterns: vec![],
        }
    }
}

impl Default for PcdConfig {
    fn default() -> Self {
        Self {
            frequency_weight: 0.5,
            recency_weight: 0.3,
            distance_weight: 0.2,
            exact_match_boost: 100.0,
            fuzzy_min_match_pct: 0.70,
            long_query_lcs_pct: 0.60,
            max_depth_tab: 3,
            max_depth_predictor: 1,
            recursive_search: true,
            enable_dot_dir_filter: true,
            custom_blocklist: vec![],
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            busy_timeout_ms: 5000,
            auto_save_interval_secs: 300,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_file: None,
            max_log_size_mb: 50,
        }
    }
}

// --- Methods ---

impl Config {
    pub fn load() -> Self {
        let config_path = dirs::config_dir()
            .map(|d| d.join("pscue").join("config.toml"))
            .unwrap_or_else(|| PathBuf::from("~/.config/pscue/config.toml"));

        if config_path.exists() {
            match std::fs::read_to_string(&config_path) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(config) => {
                        tracing::info!("loaded config from {}", config_path.display());
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("failed to parse config: {e}, using defaults");
                    }
                },
                Err(e) => {
                    tracing::warn!("failed to read config: {e}, using defaults");
                }
            }
        }

        Config::default()
    }

    /// Platform user-data directory for the learned-data database, honoring
    /// a configured override.
    pub fn data_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.persistence.data_dir {
            return PathBuf::from(dir);
        }

        if cfg!(target_os = "windows") {
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                return PathBuf::from(local).join("PSCue");
            }
        }

        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("PSCue")
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("learned-data.db")
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        self.logging.log_file.as_ref().map(|p| {
            let expanded = p.replace('~', &dirs::home_dir().unwrap_or_default().to_string_lossy());
            PathBuf::from(expanded)
        })
    }

    pub fn with_socket_override(mut self, socket_path: Option<PathBuf>) -> Self {
        self.socket_override = socket_path;
        self
    }

    pub fn socket_path(&self) -> PathBuf {
        self.socket_override
            .clone()
            .or_else(|| std::env::var("PSCUE_SOCKET").ok().map(PathBuf::from))
            .unwrap_or_else(|| self.data_dir().join("pscue.sock"))
    }

    pub fn pid_path(&self) -> PathBuf {
        self.data_dir().join("pscue.pid")
    }

    pub fn interaction_log_path(&self) -> PathBuf {
        self.log_path().unwrap_or_else(|| self.data_dir().join("interactions.jsonl"))
    }
}
