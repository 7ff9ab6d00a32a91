//! hwprobe - command-line probing of serial devices
//!
//! Sends single commands or polls a configured device, printing decoded
//! readings for humans or scripts.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use hwprobe_core::cli::{exit_code_for, print_exit_codes, ExitCodes, Interpretation, OutputFormat, Reading};
use hwprobe_core::config::{DeviceConfig, ProbeConfig};
use hwprobe_core::core::dispatch::{DispatchError, Dispatcher, RetryPolicy};
use hwprobe_core::core::protocol::devices::lrf::LrfReading;
use hwprobe_core::core::protocol::{Command, DeviceProfile, LengthEncoding};
use hwprobe_core::core::scan::{scan_baud_rates, RateOutcome, COMMON_BAUD_RATES};
use hwprobe_core::core::simulator::DeviceTemplates;
use hwprobe_core::core::transport::{list_ports, SerialChannel, SerialPortChannel, Transport, TransportError};

/// hwprobe CLI
#[derive(Parser, Debug)]
#[command(name = "hwprobe", version, about = "Probe serial cameras, rangefinders and PTZ heads", long_about = None)]
struct Cli {
    /// Device table (TOML)
    #[arg(short, long, global = true, env = "HWPROBE_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, global = true, default_value_t = OutputFormat::Text)]
    format: OutputFormat,

    /// Verbose output (frames on the wire)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Log as JSON
    #[arg(long, global = true)]
    log_json: bool,

    /// Talk to a built-in virtual device instead of the serial port
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List available serial ports
    ListPorts {
        /// Show detailed info
        #[arg(short, long)]
        detailed: bool,
    },

    /// Show configured devices
    Devices,

    /// Send one command and print the reply
    Send {
        /// Configured device name
        device: String,

        /// Function code (e.g. 0x20)
        #[arg(value_parser = parse_byte)]
        function: u8,

        /// Payload as hex (e.g. "01 2C")
        payload: Option<String>,

        /// Total attempts on lost or corrupt replies
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Override the reply wait (milliseconds)
        #[arg(long)]
        max_wait_ms: Option<u64>,
    },

    /// Send a command repeatedly, printing each reply
    Poll {
        /// Configured device name
        device: String,

        /// Function code (e.g. 0x02)
        #[arg(value_parser = parse_byte)]
        function: u8,

        /// Payload as hex
        payload: Option<String>,

        /// Interval between commands in milliseconds (default: device setting)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Stop after this many commands
        #[arg(short = 'n', long)]
        count: Option<u64>,

        /// Total attempts per reading on lost or corrupt replies
        #[arg(long, default_value_t = 1)]
        retries: u32,

        /// Abort after this many consecutive failures
        #[arg(long)]
        max_failures: Option<u32>,
    },

    /// Find the baud rate a device answers at
    ScanBaud {
        /// Configured device name
        device: String,

        /// Rates to try, comma separated (default: common rates)
        #[arg(long, value_delimiter = ',')]
        rates: Vec<u32>,
    },

    /// Write the built-in device table to the config path
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Show exit codes
    ExitCodes,
}

/// Bad command-line input
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
struct UsageError(String);

fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid byte '{s}': {e}"))
}

fn parse_payload(s: Option<&str>) -> anyhow::Result<Vec<u8>> {
    let Some(s) = s else {
        return Ok(Vec::new());
    };
    let cleaned: String = s
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .map(|part| part.trim_start_matches("0x"))
        .collect();
    hex::decode(&cleaned).map_err(|e| UsageError(format!("invalid payload '{s}': {e}")).into())
}

fn init_logging(cli: &Cli) {
    let level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if cli.log_json {
        builder.json().init();
    } else {
        builder.with_target(false).init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = if e.downcast_ref::<UsageError>().is_some() {
                ExitCodes::INVALID_ARGS
            } else {
                exit_code_for(&e)
            };
            if !cli.quiet {
                eprintln!("Error: {e:#}");
            }
            ExitCode::from(code)
        }
    }
}

async fn run(cli: &Cli) -> anyhow::Result<()> {
    match &cli.command {
        Commands::ListPorts { detailed } => show_ports(cli, *detailed),
        Commands::Devices => show_devices(cli),
        Commands::ExitCodes => {
            print_exit_codes();
            Ok(())
        }
        Commands::InitConfig { force } => init_config(cli, *force),
        Commands::ScanBaud { device, rates } => {
            let config = ProbeConfig::load(cli.config.as_deref())?;
            scan_baud(cli, &config, device, rates).await
        }
        Commands::Send {
            device,
            function,
            payload,
            retries,
            max_wait_ms,
        } => {
            let config = ProbeConfig::load(cli.config.as_deref())?;
            let payload = parse_payload(payload.as_deref())?;
            send(cli, &config, device, *function, payload, *retries, *max_wait_ms).await
        }
        Commands::Poll {
            device,
            function,
            payload,
            interval,
            count,
            retries,
            max_failures,
        } => {
            let config = ProbeConfig::load(cli.config.as_deref())?;
            let payload = parse_payload(payload.as_deref())?;
            let options = PollOptions {
                interval: interval.map(Duration::from_millis),
                count: *count,
                policy: RetryPolicy::attempts(*retries),
                max_failures: *max_failures,
            };
            poll(cli, &config, device, *function, payload, &options).await
        }
    }
}

fn show_ports(cli: &Cli, detailed: bool) -> anyhow::Result<()> {
    let ports = list_ports()?;

    if ports.is_empty() {
        if !cli.quiet {
            println!("No serial ports found.");
        }
        return Ok(());
    }

    match cli.format {
        OutputFormat::Json => {
            let json: Vec<serde_json::Value> = ports
                .iter()
                .map(|p| {
                    serde_json::json!({
                        "name": p.port_name,
                        "type": format!("{:?}", p.port_type)
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text | OutputFormat::Hex => {
            if detailed {
                println!("Available Serial Ports:");
                println!("{:-<60}", "");
                for port in &ports {
                    println!("  {} [{:?}]", port.port_name, port.port_type);
                }
            } else {
                for port in &ports {
                    println!("{}", port.port_name);
                }
            }
        }
    }

    Ok(())
}

fn show_devices(cli: &Cli) -> anyhow::Result<()> {
    let config = ProbeConfig::load(cli.config.as_deref())?;

    if cli.format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&config.devices)?);
        return Ok(());
    }

    println!("{:<16} {:<8} {:<32} {}", "NAME", "FAMILY", "PORT", "DESCRIPTION");
    println!("{:-<80}", "");
    for (name, device) in &config.devices {
        println!(
            "{:<16} {:<8} {:<32} {}",
            name,
            device.family.to_string(),
            device.serial.summary(),
            device.description.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

fn init_config(cli: &Cli, force: bool) -> anyhow::Result<()> {
    let path = ProbeConfig::resolve_path(cli.config.as_deref())?;
    if path.exists() && !force {
        return Err(UsageError(format!("{} exists, use --force to overwrite", path.display())).into());
    }
    ProbeConfig::default().save(&path)?;
    if !cli.quiet {
        println!("Wrote {}", path.display());
    }
    Ok(())
}

/// Open the device's port, or its virtual twin with `--simulate`
fn connect(cli: &Cli, device: &DeviceConfig) -> anyhow::Result<Dispatcher<Box<dyn SerialChannel>>> {
    let channel = open_at(cli, device, device.serial.baud_rate)?;
    tracing::debug!(channel = %channel.describe(), family = %device.family, "connected");
    Ok(Dispatcher::new(Transport::new(channel)))
}

/// Open the device's port at `baud_rate`
///
/// With `--simulate`, only the configured rate reaches the virtual device;
/// every other rate hears line noise.
fn open_at(cli: &Cli, device: &DeviceConfig, baud_rate: u32) -> Result<Box<dyn SerialChannel>, TransportError> {
    if cli.simulate {
        let channel = if baud_rate == device.serial.baud_rate {
            DeviceTemplates::for_family(device.family, device.wire_address())
        } else {
            DeviceTemplates::line_noise()
        };
        return Ok(Box::new(channel));
    }
    let channel = SerialPortChannel::open(device.serial.clone().baud_rate(baud_rate))?;
    Ok(Box::new(channel))
}

/// Build the command, rejecting payloads the request layout cannot carry
fn build_command(profile: &DeviceProfile, function: u8, payload: Vec<u8>) -> anyhow::Result<Command> {
    let capacity = profile.request.payload_capacity();
    if payload.len() > capacity {
        return Err(UsageError(format!(
            "{} payload is at most {capacity} bytes, got {}",
            profile.family,
            payload.len()
        ))
        .into());
    }
    if let LengthEncoding::Terminator { byte } = profile.request.length {
        if payload.contains(&byte) {
            return Err(UsageError(format!("{} payload may not contain {byte:#04x}", profile.family)).into());
        }
    }
    Ok(Command::new(function, payload))
}

fn check_range(device: &DeviceConfig, reading: &Reading) {
    if let Some(Interpretation::Rangefinder {
        reading: LrfReading::Range {
            distance_m, valid: true, ..
        },
    }) = &reading.value
    {
        if !device.in_range(*distance_m) {
            tracing::warn!(device = %reading.device, distance_m, "distance outside configured window");
        }
    }
}

async fn send(
    cli: &Cli,
    config: &ProbeConfig,
    name: &str,
    function: u8,
    payload: Vec<u8>,
    retries: u32,
    max_wait_ms: Option<u64>,
) -> anyhow::Result<()> {
    let device = config.device(name)?;
    let mut profile = device.profile();
    if let Some(ms) = max_wait_ms {
        profile.timing = profile.timing.max_wait(Duration::from_millis(ms));
    }
    let command = build_command(&profile, function, payload)?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    ctrlc::set_handler(move || trigger.cancel())?;

    let dispatcher = connect(cli, device)?;
    let result = dispatcher
        .execute_with_retry(&profile, &command, &RetryPolicy::attempts(retries), &cancel)
        .await;
    dispatcher.close().await?;

    let frame = result.with_context(|| format!("{name}: function {function:#04x}"))?;
    let reading = Reading::new(name, device.family, &frame);
    check_range(device, &reading);
    println!("{}", reading.render(cli.format));
    Ok(())
}

async fn scan_baud(cli: &Cli, config: &ProbeConfig, name: &str, rates: &[u32]) -> anyhow::Result<()> {
    let device = config.device(name)?;
    let rates = if rates.is_empty() { &COMMON_BAUD_RATES[..] } else { rates };
    if rates.contains(&0) {
        return Err(UsageError("baud rate must be positive".into()).into());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    ctrlc::set_handler(move || trigger.cancel())?;

    let results = scan_baud_rates(&device.profile(), rates, |rate| open_at(cli, device, rate), &cancel).await?;

    match cli.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&results)?),
        OutputFormat::Text | OutputFormat::Hex => {
            for probe in &results {
                let detail = match &probe.outcome {
                    RateOutcome::Found { reply } => format!("found  {reply}"),
                    RateOutcome::Garbled { reply } => format!("noise  {reply}"),
                    RateOutcome::Silent => "no response".to_string(),
                    RateOutcome::Failed { error } => format!("error  {error}"),
                };
                println!("{:>7} baud  {detail}", probe.baud_rate);
            }
        }
    }

    if results.iter().any(|r| r.is_found()) {
        Ok(())
    } else {
        Err(TransportError::Timeout(device.profile().timing.max_wait))
            .with_context(|| format!("{name}: no baud rate answered"))
    }
}

struct PollOptions {
    interval: Option<Duration>,
    count: Option<u64>,
    policy: RetryPolicy,
    max_failures: Option<u32>,
}

async fn poll(
    cli: &Cli,
    config: &ProbeConfig,
    name: &str,
    function: u8,
    payload: Vec<u8>,
    options: &PollOptions,
) -> anyhow::Result<()> {
    let device = config.device(name)?;
    let profile = device.profile();
    let command = build_command(&profile, function, payload)?;
    let interval = options.interval.unwrap_or_else(|| device.poll_interval());
    if interval.is_zero() {
        return Err(UsageError("poll interval must be positive".into()).into());
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    ctrlc::set_handler(move || trigger.cancel())?;

    let dispatcher = connect(cli, device)?;
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut sent = 0u64;
    let mut ok = 0u64;
    let mut consecutive = 0u32;

    let outcome = loop {
        if options.count.is_some_and(|n| sent >= n) {
            break Ok(());
        }
        tokio::select! {
            biased;
            () = cancel.cancelled() => break Ok(()),
            _ = ticker.tick() => {}
        }
        sent += 1;

        match dispatcher
            .execute_with_retry(&profile, &command, &options.policy, &cancel)
            .await
        {
            Ok(frame) => {
                consecutive = 0;
                ok += 1;
                let reading = Reading::new(name, device.family, &frame);
                check_range(device, &reading);
                println!("{}", reading.render(cli.format));
            }
            Err(DispatchError::Transport(TransportError::Cancelled)) => break Ok(()),
            Err(e) => {
                consecutive += 1;
                tracing::warn!(device = name, error = %e, consecutive, "poll failed");
                if options.max_failures.is_some_and(|max| consecutive >= max) {
                    break Err::<(), _>(e).with_context(|| format!("{name}: {consecutive} consecutive failures"));
                }
            }
        }
    };

    let stats = dispatcher.stats().await;
    tracing::info!(
        device = name,
        sent,
        ok,
        bytes_sent = stats.bytes_sent,
        bytes_received = stats.bytes_received,
        discarded = stats.bytes_discarded,
        "poll finished"
    );
    dispatcher.close().await?;
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte() {
        assert_eq!(parse_byte("0x20"), Ok(0x20));
        assert_eq!(parse_byte("32"), Ok(32));
        assert!(parse_byte("0x100").is_err());
    }

    #[test]
    fn test_parse_payload() {
        assert_eq!(parse_payload(Some("01 2C")).unwrap(), vec![0x01, 0x2C]);
        assert_eq!(parse_payload(Some("0x01,0x2c")).unwrap(), vec![0x01, 0x2C]);
        assert!(parse_payload(None).unwrap().is_empty());
        assert!(parse_payload(Some("zz")).is_err());
    }

    #[test]
    fn test_cli_parses() {
        let cli = Cli::try_parse_from(["hwprobe", "--simulate", "poll", "lrf", "0x02", "-n", "3"]).unwrap();
        assert!(cli.simulate);
        assert!(matches!(cli.command, Commands::Poll { function: 0x02, count: Some(3), .. }));
    }

    #[test]
    fn test_scan_baud_parses_rates() {
        let cli = Cli::try_parse_from(["hwprobe", "scan-baud", "night-camera", "--rates", "9600,921600"]).unwrap();
        match cli.command {
            Commands::ScanBaud { device, rates } => {
                assert_eq!(device, "night-camera");
                assert_eq!(rates, vec![9600, 921_600]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_simulated_scan_finds_configured_rate() {
        let cli = Cli::try_parse_from(["hwprobe", "--simulate", "scan-baud", "night-camera"]).unwrap();
        let config = ProbeConfig::default();
        let device = config.device("night-camera").unwrap();

        let results = scan_baud_rates(
            &device.profile(),
            &COMMON_BAUD_RATES,
            |rate| open_at(&cli, device, rate),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

        let found: Vec<u32> = results.iter().filter(|r| r.is_found()).map(|r| r.baud_rate).collect();
        assert_eq!(found, vec![921_600]);
    }
}
