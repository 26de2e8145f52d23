//! Command-line front end
//!
//! `status` and `switch` run against the virtual protocol client seeded from
//! the device configuration file, so requests can be exercised without field
//! hardware. The request timeout bounds every command; an expired request is
//! reported and its result discarded.

use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use tracing::{error, info};

use crate::config::IecSrvConfig;
use crate::model::{DeviceRequest, LightValue, SetLightRequest};
use crate::protocol::{ProtocolClient, VirtualClient};
use crate::service::DeviceService;
use crate::store::{DeviceConfigStore, InMemoryDeviceStore};

pub const EXIT_OK: u8 = 0;
pub const EXIT_FAILURE_RESPONSE: u8 = 1;
pub const EXIT_TIMEOUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "iecsrv", author, version, about = "IEC 61850 device-control adapter")]
pub struct Cli {
    /// Configuration file (default: config/iecsrv.yaml when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level override (trace, debug, info, warn, error)
    #[arg(short = 'l', long)]
    pub log_level: Option<String>,

    /// Log to the console only
    #[arg(long)]
    pub no_file_log: bool,

    /// Disable colored output
    #[arg(long)]
    pub no_color: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Load and validate the service and device configuration
    Validate,

    /// Read the relay status of a device
    Status {
        #[arg(long)]
        device: String,

        #[command(flatten)]
        request: RequestArgs,
    },

    /// Switch lights, e.g. `--light 0:on` or `--light 2:off --light 3:on`
    Switch {
        #[arg(long)]
        device: String,

        #[arg(long = "light", required = true, value_parser = parse_light_value)]
        lights: Vec<LightValue>,

        #[command(flatten)]
        request: RequestArgs,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// Correlation id (generated when omitted)
    #[arg(long)]
    pub correlation_uid: Option<String>,

    #[arg(long, default_value = "cli")]
    pub organisation: String,

    /// Override the configured device address
    #[arg(long)]
    pub ip: Option<IpAddr>,
}

/// `INDEX:on|off`
pub fn parse_light_value(s: &str) -> Result<LightValue, String> {
    let (index, state) = s
        .split_once(':')
        .ok_or_else(|| format!("expected INDEX:on|off, got '{}'", s))?;
    let index: u16 = index
        .trim()
        .parse()
        .map_err(|e| format!("invalid light index '{}': {}", index, e))?;
    let on = match state.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => true,
        "off" | "false" | "0" => false,
        other => return Err(format!("invalid light state '{}'", other)),
    };
    Ok(LightValue::new(index, on))
}

/// Result of one command: exit code plus the JSON document printed to stdout
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutput {
    pub exit_code: u8,
    pub body: serde_json::Value,
}

#[derive(Debug, Serialize)]
struct ValidationReport<'a> {
    valid: bool,
    devices: usize,
    config: &'a IecSrvConfig,
}

#[derive(Debug, Serialize)]
struct TimeoutReport {
    error_code: &'static str,
    reason: String,
}

impl CommandOutput {
    fn new(exit_code: u8, body: &impl Serialize) -> anyhow::Result<Self> {
        Ok(Self {
            exit_code,
            body: serde_json::to_value(body)?,
        })
    }
}

/// Load configuration, initialize logging, execute the command and print its output
pub async fn run(cli: Cli) -> anyhow::Result<u8> {
    let config = IecSrvConfig::load(cli.config.as_deref())?;

    let mut logging = config.logging.clone();
    if cli.no_file_log {
        logging.file = false;
    }
    common::init_with_config(logging.to_log_config(cli.log_level.as_deref(), !cli.no_color))?;

    let store = InMemoryDeviceStore::from_yaml_file(&config.devices.file)?;
    let output = execute(&cli.command, &config, store).await?;

    println!("{}", serde_json::to_string_pretty(&output.body)?);
    Ok(output.exit_code)
}

/// Execute a command against an already loaded configuration
pub async fn execute(
    command: &Command,
    config: &IecSrvConfig,
    store: InMemoryDeviceStore,
) -> anyhow::Result<CommandOutput> {
    match command {
        Command::Validate => {
            info!("Configuration valid, {} device(s)", store.len());
            CommandOutput::new(
                EXIT_OK,
                &ValidationReport {
                    valid: true,
                    devices: store.len(),
                    config,
                },
            )
        },
        Command::Status { device, request } => {
            let device_request = device_request(&store, device, request).await;
            let service = dry_run_service(config, store);
            let outcome = with_request_timeout(
                config.connection.request_timeout(),
                service.get_status(&device_request),
            )
            .await;
            render(outcome, config.connection.request_timeout())
        },
        Command::Switch {
            device,
            lights,
            request,
        } => {
            let set_light = SetLightRequest {
                header: device_request(&store, device, request).await,
                light_values: lights.clone(),
            };
            let service = dry_run_service(config, store);
            let outcome = with_request_timeout(
                config.connection.request_timeout(),
                service.set_light(&set_light),
            )
            .await;
            render(outcome, config.connection.request_timeout())
        },
    }
}

/// Service wired to a virtual client holding every configured device
fn dry_run_service(config: &IecSrvConfig, store: InMemoryDeviceStore) -> DeviceService {
    let client: Arc<dyn ProtocolClient> = Arc::new(VirtualClient::from_device_configs(store.devices()));
    DeviceService::new(Arc::new(store), client, config)
}

async fn device_request(
    store: &InMemoryDeviceStore,
    device: &str,
    args: &RequestArgs,
) -> DeviceRequest {
    // Unknown devices keep an unspecified address; the service reports them
    let ip_address = match args.ip {
        Some(ip) => ip,
        None => store
            .find_device_config(device)
            .await
            .map(|config| config.ip_address)
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
    };

    DeviceRequest {
        organisation_identification: args.organisation.clone(),
        device_identification: device.to_string(),
        correlation_uid: args
            .correlation_uid
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string()),
        ip_address,
    }
}

/// `None` when the request did not finish in time
async fn with_request_timeout<F: Future>(timeout: Duration, request: F) -> Option<F::Output> {
    tokio::time::timeout(timeout, request).await.ok()
}

fn render<T: Serialize, E: Serialize>(
    outcome: Option<Result<T, E>>,
    timeout: Duration,
) -> anyhow::Result<CommandOutput> {
    match outcome {
        Some(Ok(response)) => CommandOutput::new(EXIT_OK, &response),
        Some(Err(failure)) => CommandOutput::new(EXIT_FAILURE_RESPONSE, &failure),
        None => {
            let reason = format!("Request timed out after {:?}", timeout);
            error!("{}", reason);
            CommandOutput::new(
                EXIT_TIMEOUT,
                &TimeoutReport {
                    error_code: "IECSRV_REQUEST_TIMEOUT",
                    reason,
                },
            )
        },
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use clap::CommandFactory;
    use serde_json::json;

    const DEVICES: &str = r#"
devices:
  - device_identification: SSLD_1
    ip_address: 10.0.0.1
    output_settings:
      - { internal_index: 1, external_index: 1, relay_type: LIGHT }
      - { internal_index: 2, external_index: 2, relay_type: TARIFF }
"#;

    fn config() -> IecSrvConfig {
        let mut config = IecSrvConfig::default();
        config.retry.delay_ms = 1;
        config
    }

    fn store() -> InMemoryDeviceStore {
        InMemoryDeviceStore::from_yaml_str(DEVICES).unwrap()
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_light_value() {
        assert_eq!(parse_light_value("1:on").unwrap(), LightValue::new(1, true));
        assert_eq!(parse_light_value("0:OFF").unwrap(), LightValue::new(0, false));
        assert!(parse_light_value("1").is_err());
        assert!(parse_light_value("x:on").is_err());
        assert!(parse_light_value("1:dim").is_err());
    }

    #[test]
    fn test_parse_switch_command() {
        let cli = Cli::try_parse_from([
            "iecsrv",
            "--no-file-log",
            "switch",
            "--device",
            "SSLD_1",
            "--light",
            "0:on",
            "--light",
            "2:off",
        ])
        .unwrap();
        assert!(cli.no_file_log);
        match cli.command {
            Command::Switch { device, lights, .. } => {
                assert_eq!(device, "SSLD_1");
                assert_eq!(lights, vec![LightValue::new(0, true), LightValue::new(2, false)]);
            },
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_switch_requires_light() {
        assert!(Cli::try_parse_from(["iecsrv", "switch", "--device", "SSLD_1"]).is_err());
    }

    #[tokio::test]
    async fn test_status_dry_run() {
        let command = Command::Status {
            device: "SSLD_1".to_string(),
            request: RequestArgs {
                correlation_uid: Some("c-1".to_string()),
                organisation: "org".to_string(),
                ip: None,
            },
        };
        let output = execute(&command, &config(), store()).await.unwrap();

        assert_eq!(output.exit_code, EXIT_OK);
        assert_eq!(output.body["correlation_uid"], "c-1");
        assert_eq!(
            output.body["device_status"]["light_values"][0],
            json!({"index": 1, "on": false})
        );
    }

    #[tokio::test]
    async fn test_switch_non_light_reports_failure() {
        let command = Command::Switch {
            device: "SSLD_1".to_string(),
            lights: vec![LightValue::new(2, true)],
            request: RequestArgs {
                correlation_uid: None,
                organisation: "org".to_string(),
                ip: None,
            },
        };
        let output = execute(&command, &config(), store()).await.unwrap();

        assert_eq!(output.exit_code, EXIT_FAILURE_RESPONSE);
        assert_eq!(
            output.body["functional_error"],
            "LIGHT_SWITCHING_NOT_ALLOWED_FOR_RELAY"
        );
    }

    #[tokio::test]
    async fn test_unknown_device_reports_not_found() {
        let command = Command::Status {
            device: "SSLD_X".to_string(),
            request: RequestArgs {
                correlation_uid: None,
                organisation: "org".to_string(),
                ip: None,
            },
        };
        let output = execute(&command, &config(), store()).await.unwrap();
        assert_eq!(output.exit_code, EXIT_FAILURE_RESPONSE);
        assert_eq!(output.body["error_code"], "IECSRV_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_request_timeout_discards_result() {
        let outcome =
            with_request_timeout(Duration::from_millis(5), tokio::time::sleep(Duration::from_secs(5)))
                .await;
        assert!(outcome.is_none());

        let output = render::<(), ()>(None, Duration::from_millis(5)).unwrap();
        assert_eq!(output.exit_code, EXIT_TIMEOUT);
        assert_eq!(output.body["error_code"], "IECSRV_REQUEST_TIMEOUT");
        assert_eq!(output.body["reason"], "Request timed out after 5ms");
    }

    #[tokio::test]
    async fn test_validate_reports_device_count() {
        let output = execute(&Command::Validate, &config(), store()).await.unwrap();
        assert_eq!(output.exit_code, EXIT_OK);
        assert_eq!(output.body["valid"], true);
        assert_eq!(output.body["devices"], 1);
        assert_eq!(output.body["config"]["connection"]["port"], 102);
    }
}
