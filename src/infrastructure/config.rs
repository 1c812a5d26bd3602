use crate::application::hub::HubSettings;
use crate::domain::diagram::DiagramType;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub api: ApiSettings,
    #[serde(default)]
    pub refresh: RefreshConfig,
    #[serde(default)]
    pub map: MapSettings,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Backend REST API holding diagrams, sensor states and virtual sensors.
#[derive(Debug, Deserialize, Clone)]
pub struct ApiSettings {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub id_enterprise: String,
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            token: String::new(),
            id_enterprise: String::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RefreshConfig {
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Keyed by diagram type name, e.g. `PMS = 60`.
    #[serde(default)]
    pub interval_secs: HashMap<String, u64>,
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            settle_delay_ms: default_settle_delay_ms(),
            interval_secs: HashMap::new(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapSettings {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
        }
    }
}

const DIAGRAM_TYPES: [DiagramType; 7] = [
    DiagramType::Unifilar,
    DiagramType::Unifilar4Dg,
    DiagramType::Pms,
    DiagramType::EngineV16,
    DiagramType::Azimutal,
    DiagramType::Consumo,
    DiagramType::BowThruster,
];

fn default_interval_secs(diagram_type: DiagramType) -> u64 {
    match diagram_type {
        DiagramType::Pms | DiagramType::EngineV16 | DiagramType::Consumo => 60,
        DiagramType::Azimutal
        | DiagramType::BowThruster
        | DiagramType::Unifilar
        | DiagramType::Unifilar4Dg => 30,
    }
}

impl RefreshConfig {
    pub fn hub_settings(&self) -> HubSettings {
        // Config keys may come back lowercased from environment sources.
        let overrides: HashMap<String, u64> = self
            .interval_secs
            .iter()
            .map(|(k, v)| (k.to_ascii_uppercase(), *v))
            .collect();

        let refresh_intervals = DIAGRAM_TYPES
            .iter()
            .map(|t| {
                let secs = overrides
                    .get(t.as_str())
                    .copied()
                    .unwrap_or_else(|| default_interval_secs(*t));
                (*t, Duration::from_secs(secs))
            })
            .collect();

        HubSettings {
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            default_refresh_interval: Duration::from_secs(60),
            refresh_intervals,
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_api_host() -> String {
    "http://localhost:3000".to_string()
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_event_capacity() -> usize {
    64
}

/// `config/telemetry.toml` when present, overridden by `TELEMETRY__*` variables.
pub fn load_app_config() -> anyhow::Result<AppConfig> {
    let settings = config::Config::builder()
        .add_source(config::File::with_name("config/telemetry").required(false))
        .add_source(config::Environment::with_prefix("TELEMETRY").separator("__"))
        .build()?;

    Ok(settings.try_deserialize()?)
}
