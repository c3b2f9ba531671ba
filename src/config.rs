use crate::models::Instrument;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default config file, looked up relative to the working directory
pub const DEFAULT_CONFIG: &str = "config/default";

#[derive(Debug, Clone, Deserialize)]
pub struct AccountSettings {
    #[serde(default = "default_account_name")]
    pub name: String,
    #[serde(default = "default_balance")]
    pub balance: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
}

impl Default for AccountSettings {
    fn default() -> Self {
        Self {
            name: default_account_name(),
            balance: default_balance(),
            leverage: default_leverage(),
            currency: default_currency(),
        }
    }
}

fn default_account_name() -> String {
    "Simulation".to_string()
}
fn default_balance() -> f64 {
    10_000.0
}
fn default_leverage() -> f64 {
    1.0
}
fn default_currency() -> String {
    "USD".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct SimulationSettings {
    /// Directory holding one tick file per instrument
    #[serde(default = "default_source")]
    pub source: PathBuf,
    /// Driver interval in milliseconds
    #[serde(default = "default_speed_ms")]
    pub speed_ms: u64,
    /// Replay generated ticks instead of reading `source`
    #[serde(default)]
    pub synthetic: bool,
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Synthetic ticks per instrument
    #[serde(default = "default_ticks")]
    pub ticks: usize,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            source: default_source(),
            speed_ms: default_speed_ms(),
            synthetic: false,
            seed: default_seed(),
            ticks: default_ticks(),
        }
    }
}

fn default_source() -> PathBuf {
    PathBuf::from("data")
}
fn default_speed_ms() -> u64 {
    100
}
fn default_seed() -> u64 {
    42
}
fn default_ticks() -> usize {
    1000
}

#[derive(Debug, Clone, Deserialize)]
pub struct InstrumentSettings {
    pub name: String,
    #[serde(default)]
    pub commission: f64,
    #[serde(default = "default_contract_size")]
    pub contract_size: f64,
    #[serde(default = "default_step")]
    pub step_size: f64,
    #[serde(default = "default_step")]
    pub step_value: f64,
    #[serde(default)]
    pub swap_long: f64,
    #[serde(default)]
    pub swap_short: f64,
    #[serde(default = "default_time_frame_secs")]
    pub time_frame_secs: i64,
    /// Starting mid price for generated ticks
    #[serde(default = "default_base_price")]
    pub base_price: f64,
}

fn default_contract_size() -> f64 {
    1.0
}
fn default_step() -> f64 {
    0.01
}
fn default_time_frame_secs() -> i64 {
    60
}
fn default_base_price() -> f64 {
    100.0
}

impl InstrumentSettings {
    pub fn to_instrument(&self) -> Instrument {
        let mut instrument = Instrument::new(self.name.clone())
            .with_steps(self.step_size, self.step_value)
            .with_commission(self.commission)
            .with_time_frame(chrono::Duration::seconds(self.time_frame_secs));

        instrument.contract_size = self.contract_size;
        instrument.swap_long = self.swap_long;
        instrument.swap_short = self.swap_short;
        instrument
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_log_filter")]
    pub log_filter: String,
    #[serde(default)]
    pub account: AccountSettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
    #[serde(default)]
    pub instruments: Vec<InstrumentSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_filter: default_log_filter(),
            account: AccountSettings::default(),
            simulation: SimulationSettings::default(),
            instruments: Vec::new(),
        }
    }
}

fn default_log_filter() -> String {
    "tradesim=info".to_string()
}

impl Settings {
    /// Layer defaults, a TOML file and `TRADESIM__*` environment variables
    ///
    /// # Arguments
    /// * `path` - Explicit config file, required to exist when given;
    ///   otherwise `config/default.toml` is used if present
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let file = match path {
            Some(path) => File::from(path).required(true),
            None => File::with_name(DEFAULT_CONFIG).required(false),
        };

        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("TRADESIM")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }

    /// Parse settings from TOML text alone, ignoring the environment
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let settings = Config::builder()
            .add_source(File::from_str(content, FileFormat::Toml))
            .build()?
            .try_deserialize()?;

        Ok(settings)
    }
}
