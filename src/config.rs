use crate::types::{parse_address, RelayerConfig, RelayerError};
use clap::{error::ErrorKind, Arg, ArgAction, Command};
use config::{Config, Environment, File, FileFormat};
use std::{ffi::OsString, net::SocketAddr, path::Path};
use tracing::{info, warn};

const DEFAULTS: &str = r#"
[chain]
rpc_url = "http://127.0.0.1:8545"
contract_address = ""
private_key = ""
poll_interval_ms = 2000
max_block_range = 1000
max_retry_interval_secs = 30
signing_scheme = "double_eth_signed_message"

[matching]
tick_interval_ms = 5000

[settlement]
submission_timeout_secs = 60
simulate_before_submit = true

[api]
listen_addr = "0.0.0.0:3000"

[monitoring]
log_level = "info"

[audit]
"#;

/// Layered configuration: built-in defaults, then a TOML file, then
/// `COW_*` environment variables, then command-line flags.
pub struct ConfigBuilder {
    config: Config,
}

/// CLI arguments
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config_file: Option<String>,
    pub rpc_url: Option<String>,
    pub contract_address: Option<String>,
    pub private_key: Option<String>,
    pub listen_addr: Option<String>,
    pub log_level: Option<String>,
    pub sample_config: bool,
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: Config::default(),
        }
    }

    /// Load from the process arguments and environment.
    pub fn load() -> Result<RelayerConfig, RelayerError> {
        Self::load_from(std::env::args_os())
    }

    pub fn load_from<I, T>(args: I) -> Result<RelayerConfig, RelayerError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let cli_args = parse_cli_args(args)?;
        if cli_args.sample_config {
            print!("{}", create_sample_config());
            std::process::exit(0);
        }

        let mut builder = ConfigBuilder::new();

        builder.load_defaults()?;
        match &cli_args.config_file {
            Some(path) => builder.load_file(path)?,
            None => builder.try_load_default_files()?,
        }
        builder.load_environment()?;
        builder.apply_cli_overrides(&cli_args)?;

        let config = builder.build()?;
        validate_config(&config)?;

        info!("Configuration loaded successfully");
        Ok(config)
    }

    /// Built-in defaults only, unvalidated. Chain credentials are empty.
    pub fn defaults() -> Result<RelayerConfig, RelayerError> {
        let mut builder = ConfigBuilder::new();
        builder.load_defaults()?;
        builder.build()
    }

    fn build(&self) -> Result<RelayerConfig, RelayerError> {
        self.config
            .clone()
            .try_deserialize()
            .map_err(|e| RelayerError::ConfigError(format!("Configuration parsing error: {}", e)))
    }

    fn load_defaults(&mut self) -> Result<(), RelayerError> {
        self.config = Config::builder()
            .add_source(File::from_str(DEFAULTS, FileFormat::Toml))
            .build()
            .map_err(|e| RelayerError::ConfigError(format!("Default config error: {}", e)))?;

        Ok(())
    }

    fn load_file(&mut self, path: &str) -> Result<(), RelayerError> {
        if !Path::new(path).exists() {
            return Err(RelayerError::ConfigError(format!("Config file not found: {}", path)));
        }

        info!("Loading configuration from: {}", path);

        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(File::new(path, FileFormat::Toml))
            .build()
            .map_err(|e| RelayerError::ConfigError(format!("Config file error: {}", e)))?;

        Ok(())
    }

    fn try_load_default_files(&mut self) -> Result<(), RelayerError> {
        let default_paths = ["./config.toml", "./relayer.toml", "/etc/cow-relayer/relayer.toml"];

        for path in &default_paths {
            if Path::new(path).exists() {
                info!("Found default config file: {}", path);
                return self.load_file(path);
            }
        }

        warn!("No default config file found, using defaults and environment variables");
        Ok(())
    }

    fn load_environment(&mut self) -> Result<(), RelayerError> {
        self.config = Config::builder()
            .add_source(self.config.clone())
            .add_source(
                Environment::with_prefix("COW")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()
            .map_err(|e| RelayerError::ConfigError(format!("Environment config error: {}", e)))?;

        Ok(())
    }

    fn apply_cli_overrides(&mut self, cli_args: &CliArgs) -> Result<(), RelayerError> {
        let overrides = [
            ("chain.rpc_url", &cli_args.rpc_url),
            ("chain.contract_address", &cli_args.contract_address),
            ("chain.private_key", &cli_args.private_key),
            ("api.listen_addr", &cli_args.listen_addr),
            ("monitoring.log_level", &cli_args.log_level),
        ];

        let mut builder = Config::builder().add_source(self.config.clone());
        for (key, value) in overrides {
            if let Some(value) = value {
                builder = builder
                    .set_override(key, value.as_str())
                    .map_err(|e| RelayerError::ConfigError(format!("CLI override error: {}", e)))?;
            }
        }

        self.config = builder
            .build()
            .map_err(|e| RelayerError::ConfigError(format!("CLI config build error: {}", e)))?;

        Ok(())
    }
}

fn parse_cli_args<I, T>(args: I) -> Result<CliArgs, RelayerError>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let matches = Command::new("cow-relayer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Coincidence-of-wants intent matching and custodial settlement relayer")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .env("COW_CONFIG_FILE"),
        )
        .arg(
            Arg::new("rpc-url")
                .long("rpc-url")
                .value_name("URL")
                .help("EVM JSON-RPC endpoint")
                .env("RPC_URL"),
        )
        .arg(
            Arg::new("contract")
                .long("contract")
                .value_name("ADDRESS")
                .help("Custody contract address")
                .env("SOLO_PATTY_CONTRACT"),
        )
        .arg(
            Arg::new("private-key")
                .long("private-key")
                .value_name("HEX")
                .help("Custodian signing key")
                .env("TEE_PRIVATE_KEY")
                .hide_env_values(true),
        )
        .arg(
            Arg::new("listen")
                .long("listen")
                .value_name("ADDR")
                .help("HTTP API listen address")
                .env("LISTEN_ADDR"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("Log level (trace, debug, info, warn, error)")
                .env("LOG_LEVEL"),
        )
        .arg(
            Arg::new("sample-config")
                .long("sample-config")
                .help("Print a commented configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .try_get_matches_from(args)
        .map_err(|e| match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
            _ => RelayerError::ConfigError(e.to_string()),
        })?;

    Ok(CliArgs {
        config_file: matches.get_one::<String>("config").cloned(),
        rpc_url: matches.get_one::<String>("rpc-url").cloned(),
        contract_address: matches.get_one::<String>("contract").cloned(),
        private_key: matches.get_one::<String>("private-key").cloned(),
        listen_addr: matches.get_one::<String>("listen").cloned(),
        log_level: matches.get_one::<String>("log-level").cloned(),
        sample_config: matches.get_flag("sample-config"),
    })
}

pub fn validate_config(config: &RelayerConfig) -> Result<(), RelayerError> {
    let invalid = |message: &str| Err(RelayerError::ConfigError(message.to_string()));

    if config.chain.rpc_url.is_empty() {
        return invalid("RPC URL is required");
    }
    if config.chain.contract_address.is_empty() {
        return invalid("Custody contract address is required");
    }
    parse_address("chain.contract_address", &config.chain.contract_address)
        .map_err(|e| RelayerError::ConfigError(e.to_string()))?;
    if config.chain.private_key.is_empty() {
        return invalid("Custodian private key is required");
    }

    if config.chain.poll_interval_ms == 0 {
        return invalid("Poll interval must be greater than 0");
    }
    if config.chain.max_block_range == 0 {
        return invalid("Max block range must be greater than 0");
    }
    if config.matching.tick_interval_ms == 0 {
        return invalid("Matching tick interval must be greater than 0");
    }
    if config.settlement.submission_timeout_secs == 0 {
        return invalid("Submission timeout must be greater than 0");
    }

    config
        .api
        .listen_addr
        .parse::<SocketAddr>()
        .map_err(|e| RelayerError::ConfigError(format!("Invalid listen address: {}", e)))?;

    if let Some(address) = &config.audit.enclave_address {
        parse_address("audit.enclave_address", address)
            .map_err(|e| RelayerError::ConfigError(e.to_string()))?;
    }

    info!("Configuration validation passed");
    Ok(())
}

pub fn load_config() -> Result<RelayerConfig, RelayerError> {
    ConfigBuilder::load()
}

/// Create a sample configuration file
pub fn create_sample_config() -> String {
    r#"# CoW relayer configuration
# Copy this file to config.toml and update the values

[chain]
# EVM JSON-RPC endpoint
rpc_url = "http://127.0.0.1:8545"
# Custody contract address
contract_address = "0xYOUR_CONTRACT_ADDRESS_HERE"
# Custodian signing key (keep secure!)
private_key = "0xYOUR_PRIVATE_KEY_HERE"
# Deposit polling interval in milliseconds
poll_interval_ms = 2000
# First block to ingest deposits from; omit to start at the chain head
# start_block = 0
# Maximum blocks per log query
max_block_range = 1000
# Upper bound for the retry backoff in seconds
max_retry_interval_secs = 30
# double_eth_signed_message matches the deployed custody contract;
# eth_signed_message applies a single EIP-191 prefix
signing_scheme = "double_eth_signed_message"

[matching]
# Matching tick interval in milliseconds
tick_interval_ms = 5000

[settlement]
# Per-leg receipt timeout in seconds
submission_timeout_secs = 60
# Dry-run every leg with eth_call before sending
simulate_before_submit = true

[api]
listen_addr = "0.0.0.0:3000"

[monitoring]
# Log level (trace, debug, info, warn, error)
log_level = "info"

[audit]
# Enclave address the audit key is derived from
# enclave_address = "0x..."
"#
    .to_string()
}
