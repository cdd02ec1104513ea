//! Command-line parsing and the process-local configuration document
//! (spec §6 "Configuration Keys"). This is deliberately the thin,
//! bottom layer: the full `Device/...`, `MessageBus/...`, and
//! `SecretStore/...` trees are read from the configuration store at
//! startup (`crate::configstore::bootstrap`); what lives here is just
//! enough to locate that store and pick a starting log level before
//! anything else can run.

use clap::{crate_version, Arg, ArgAction, Command};
use serde_derive::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::Level;

fn def_service_name() -> String {
    "device-svc".into()
}

fn def_config_file() -> PathBuf {
    PathBuf::from("device-svc.toml")
}

fn def_log_level() -> String {
    "info".into()
}

fn def_max_cmd_ops() -> usize {
    128
}

fn def_event_q_length() -> usize {
    64
}

fn def_allowed_fails() -> u32 {
    3
}

fn def_device_down_timeout_ms() -> u64 {
    30_000
}

fn def_discovery_interval_ms() -> u64 {
    300_000
}

fn def_telemetry_interval_ms() -> u64 {
    30_000
}

fn def_qos() -> u8 {
    0
}

fn def_profiles_dir() -> PathBuf {
    PathBuf::from("res/profiles")
}

fn def_devices_dir() -> PathBuf {
    PathBuf::from("res/devices")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    Mqtt,
    Redis,
}

impl Default for BusKind {
    fn default() -> Self {
        BusKind::Mqtt
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "def_discovery_interval_ms")]
    pub interval_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        DiscoveryConfig { enabled: false, interval_ms: def_discovery_interval_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub data_transform: bool,
    #[serde(default = "def_max_cmd_ops")]
    pub max_cmd_ops: usize,
    #[serde(default = "def_allowed_fails")]
    pub allowed_fails: u32,
    #[serde(default = "def_device_down_timeout_ms")]
    pub device_down_timeout_ms: u64,
    #[serde(default = "def_event_q_length")]
    pub event_q_length: usize,
    #[serde(default)]
    pub discovery: DiscoveryConfig,
    /// Directory scanned at startup for `*.yaml`/`*.yml` device-profile
    /// definitions (spec §1 "YAML/JSON file readers").
    #[serde(default = "def_profiles_dir")]
    pub profiles_dir: PathBuf,
    /// Directory scanned at startup for `*.yaml`/`*.yml` device
    /// definitions.
    #[serde(default = "def_devices_dir")]
    pub devices_dir: PathBuf,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            data_transform: true,
            max_cmd_ops: def_max_cmd_ops(),
            allowed_fails: def_allowed_fails(),
            device_down_timeout_ms: def_device_down_timeout_ms(),
            event_q_length: def_event_q_length(),
            discovery: DiscoveryConfig::default(),
            profiles_dir: def_profiles_dir(),
            devices_dir: def_devices_dir(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageBusConfig {
    #[serde(default)]
    pub kind: BusKind,
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub base_topic_prefix: String,
    #[serde(default = "def_qos")]
    pub qos: u8,
}

impl Default for MessageBusConfig {
    fn default() -> Self {
        MessageBusConfig {
            kind: BusKind::default(),
            host: "localhost".into(),
            port: 1883,
            client_id: def_service_name(),
            base_topic_prefix: "edgex".into(),
            qos: def_qos(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretStoreConfig {
    #[serde(default)]
    pub secrets_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WritableConfig {
    #[serde(default = "def_log_level")]
    pub log_level: String,
    #[serde(default = "def_telemetry_interval_ms")]
    pub telemetry_interval_ms: u64,
}

impl Default for WritableConfig {
    fn default() -> Self {
        WritableConfig { log_level: def_log_level(), telemetry_interval_ms: def_telemetry_interval_ms() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "def_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub device: DeviceConfig,
    #[serde(default)]
    pub message_bus: MessageBusConfig,
    #[serde(default)]
    pub secret_store: SecretStoreConfig,
    #[serde(default)]
    pub writable: WritableConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            service_name: def_service_name(),
            device: DeviceConfig::default(),
            message_bus: MessageBusConfig::default(),
            secret_store: SecretStoreConfig::default(),
            writable: WritableConfig::default(),
        }
    }
}

impl Config {
    pub fn log_level(&self) -> Level {
        match self.writable.log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        }
    }
}

/// Overlays command-line flags onto a parsed file config: `-c` picks
/// the file itself (handled by the caller before parsing), `-v`
/// (repeatable) raises verbosity one level per occurrence, and
/// `--print-config` causes the merged document to be printed and the
/// process to exit without starting anything.
fn from_cmdline(mut cfg: Config) -> (bool, Config) {
    let matches = Command::new("devicesvcd")
        .version(crate_version!())
        .arg(Arg::new("config").short('c').long("config").help("path to the configuration file").action(ArgAction::Set))
        .arg(Arg::new("verbose").short('v').long("verbose").help("raise log verbosity; repeatable").action(ArgAction::Count))
        .arg(Arg::new("print-config").long("print-config").help("print the merged configuration and exit").action(ArgAction::SetTrue))
        .get_matches();

    let verbosity = matches.get_count("verbose");
    if verbosity > 0 {
        cfg.writable.log_level = match verbosity {
            1 => "debug",
            _ => "trace",
        }
        .to_string();
    }

    (matches.get_flag("print-config"), cfg)
}

fn config_file_path() -> PathBuf {
    let matches = Command::new("devicesvcd")
        .disable_help_flag(true)
        .disable_version_flag(true)
        .arg(Arg::new("config").short('c').long("config").action(ArgAction::Set))
        .ignore_errors(true)
        .get_matches();

    matches.get_one::<String>("config").map(PathBuf::from).unwrap_or_else(def_config_file)
}

fn parse_config(contents: &str) -> Result<Config, device_svc_api::Error> {
    toml::from_str(contents).map_err(|e| device_svc_api::Error::ConfParse(e.to_string()))
}

/// Reads the local configuration file (default `device-svc.toml`),
/// overlays CLI flags, and handles `--print-config`. Returns `None`
/// when `--print-config` already satisfied the invocation and nothing
/// further should run.
pub async fn get() -> Option<Config> {
    let path = config_file_path();

    let cfg = match tokio::fs::read_to_string(&path).await {
        Ok(contents) => match parse_config(&contents) {
            Ok(cfg) => cfg,
            Err(e) => {
                eprintln!("ERROR: invalid configuration file {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        Err(_) => Config::default(),
    };

    let (print_and_exit, cfg) = from_cmdline(cfg);

    if print_and_exit {
        match toml::to_string_pretty(&cfg) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("ERROR: failed to render configuration: {}", e),
        }
        return None;
    }

    Some(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let cfg = Config::default();
        let text = toml::to_string(&cfg).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.service_name, cfg.service_name);
        assert_eq!(parsed.message_bus.port, cfg.message_bus.port);
    }

    #[test]
    fn test_parse_config_rejects_garbage() {
        assert!(parse_config("not valid toml {{{").is_err());
    }

    #[test]
    fn test_log_level_defaults_to_info() {
        let cfg = Config::default();
        assert_eq!(cfg.log_level(), Level::INFO);
    }
}
