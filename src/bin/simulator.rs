use clap::{App, Arg, ArgMatches, SubCommand};
use colored::*;
use satsession::service::SatelliteService;
use satsession::settings::{InMemorySettings, JsonFileSettings, SettingsStore};
use satsession::simulator::{quiesce_radios, SimulatedModem, SimulatedModemConfig};
use satsession::{
    SatelliteController, SatelliteDatagram, SatelliteHandle, SessionConfig, SessionState, TransportEvent,
};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info};

const DEFAULT_EMERGENCY: &str = "2";
const DEFAULT_NORMAL: &str = "3";
const DEFAULT_LATENCY_MS: &str = "200";
const RADIO_QUIESCE_INTERVAL_MS: u64 = 100;
const PROVISION_TOKEN: &str = "demo-subscriber";

fn non_negative_number(v: String) -> Result<(), String> {
    match v.parse::<u32>() {
        Ok(_) => Ok(()),
        Err(_) => Err("Value must be a non-negative number".into()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let matches = App::new("satsession-sim")
        .version("0.1.0")
        .author("Space Systems Engineering Team")
        .about("🛰️  Satellite session simulator - enable, send datagrams, watch the session")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .value_name("FILE")
                .help("Session configuration (JSON)")
                .takes_value(true)
                .global(true),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("🚀 Run a session scenario against the simulated modem")
                .arg(
                    Arg::with_name("emergency")
                        .short("e")
                        .long("emergency")
                        .value_name("COUNT")
                        .help("Emergency datagrams to send")
                        .takes_value(true)
                        .default_value(DEFAULT_EMERGENCY)
                        .validator(non_negative_number),
                )
                .arg(
                    Arg::with_name("normal")
                        .short("n")
                        .long("normal")
                        .value_name("COUNT")
                        .help("Regular datagrams to send")
                        .takes_value(true)
                        .default_value(DEFAULT_NORMAL)
                        .validator(non_negative_number),
                )
                .arg(
                    Arg::with_name("fail-at")
                        .long("fail-at")
                        .value_name("N")
                        .help("Make the modem fail the Nth send")
                        .takes_value(true)
                        .validator(non_negative_number),
                )
                .arg(
                    Arg::with_name("latency")
                        .short("l")
                        .long("latency")
                        .value_name("MS")
                        .help("Simulated modem latency")
                        .takes_value(true)
                        .default_value(DEFAULT_LATENCY_MS)
                        .validator(non_negative_number),
                )
                .arg(Arg::with_name("demo").long("demo").help("Enable satellite in demo mode"))
                .arg(
                    Arg::with_name("settings")
                        .long("settings")
                        .value_name("FILE")
                        .help("Persist settings to this JSON file")
                        .takes_value(true),
                ),
        )
        .subcommand(SubCommand::with_name("config").about("📋 Print the effective session configuration"))
        .get_matches();

    let config = match matches.value_of("config") {
        Some(path) => SessionConfig::from_json_file(path)?,
        None => SessionConfig::default(),
    };

    match matches.subcommand() {
        ("config", _) => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        ("run", Some(sub)) => run_scenario(config, sub).await,
        _ => {
            println!("{}", "No command given, try `satsession-sim run`".yellow());
            Ok(())
        }
    }
}

fn count(matches: &ArgMatches, name: &str) -> u32 {
    matches.value_of(name).and_then(|v| v.parse().ok()).unwrap_or(0)
}

async fn run_scenario(config: SessionConfig, matches: &ArgMatches<'_>) -> Result<(), Box<dyn std::error::Error>> {
    let emergency = count(matches, "emergency");
    let normal = count(matches, "normal");
    let demo = matches.is_present("demo");

    let modem_config = SimulatedModemConfig {
        latency_ms: u64::from(count(matches, "latency")),
        fail_send_at: matches.value_of("fail-at").and_then(|v| v.parse().ok()),
        ..SimulatedModemConfig::default()
    };

    let settings: Box<dyn SettingsStore> = match matches.value_of("settings") {
        Some(path) => Box::new(JsonFileSettings::open(path)?),
        None => Box::new(InMemorySettings::default()),
    };

    println!("{}", "🛰️  Satellite Session Simulator".bright_cyan().bold());
    println!("{}", "================================".bright_cyan());

    let (events_tx, events_rx) = mpsc::unbounded_channel::<TransportEvent>();
    let modem = SimulatedModem::new(modem_config, events_tx);
    let radios = config.coexistence_radios.clone();
    let controller = SatelliteController::new(config, Some(Box::new(modem)), settings);
    let (handle, task) = SatelliteService::spawn(controller, events_rx);

    let (_, mut states) = handle.subscribe_session_state().await?;
    tokio::spawn(async move {
        while let Some(state) = states.recv().await {
            println!("  {} {}", "session →".dimmed(), format_state(state));
        }
    });

    print_step("Provisioning");
    let provisioning = handle.provision(PROVISION_TOKEN, b"demo")?;
    report("provision", provisioning.wait().await?);

    match handle.request_capabilities().await? {
        Ok(caps) => println!(
            "  {} max {} bytes/datagram, pointing required: {}",
            "capabilities".dimmed(),
            caps.max_bytes_per_outgoing_datagram,
            caps.is_pointing_required
        ),
        Err(e) => println!("  {} {}", "capabilities".dimmed(), e.to_string().red()),
    }

    print_step(if demo { "Enabling satellite (demo mode)" } else { "Enabling satellite" });
    let radio_task = quiesce_radios(handle.clone(), radios, Duration::from_millis(RADIO_QUIESCE_INTERVAL_MS));
    let enabled = handle.set_satellite_enabled(true, demo).await?;
    report("enable", enabled);
    radio_task.await?;
    if enabled.is_err() {
        return shutdown(&handle, task).await;
    }

    print_step(&format!("Sending {} emergency and {} regular datagrams", emergency, normal));
    send_datagrams(&handle, emergency, normal).await?;

    let snapshot = handle.snapshot();
    println!(
        "  {} sent {}, aborted {}",
        "stats".dimmed(),
        snapshot.datagrams_sent.to_string().green(),
        snapshot.datagrams_aborted.to_string().yellow()
    );

    print_step("Disabling satellite");
    report("disable", handle.set_satellite_enabled(false, false).await?);

    shutdown(&handle, task).await
}

async fn send_datagrams(handle: &SatelliteHandle, emergency: u32, normal: u32) -> Result<(), Box<dyn std::error::Error>> {
    // Regular traffic first so the emergency ones visibly jump the queue.
    let mut pending = Vec::new();
    for i in 0..normal {
        let rx = handle.submit_datagram(SatelliteDatagram::non_emergency(format!("location #{}", i).into_bytes()))?;
        pending.push((format!("regular #{}", i), rx));
    }
    for i in 0..emergency {
        let rx = handle.submit_datagram(SatelliteDatagram::emergency(format!("SOS #{}", i).into_bytes()))?;
        pending.push((format!("emergency #{}", i), rx));
    }
    for (label, rx) in pending {
        match rx.await {
            Ok(result) => report(&label, result),
            Err(_) => error!("{} dropped without a result", label),
        }
    }
    Ok(())
}

async fn shutdown(
    handle: &SatelliteHandle,
    task: tokio::task::JoinHandle<()>,
) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = handle.snapshot();
    info!(?snapshot, "final session snapshot");
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    handle.shutdown()?;
    task.await?;
    println!("{}", "🚀 Simulator stopped".bright_cyan());
    Ok(())
}

fn print_step(title: &str) {
    println!("\n{} {}", "▶".bright_blue(), title.bold());
}

fn report(label: &str, result: satsession::SatelliteResult) {
    match result {
        Ok(()) => println!("  {} {}", "✅".green(), label),
        Err(e) => println!("  {} {}: {}", "❌".red(), label, e.to_string().red()),
    }
}

fn format_state(state: SessionState) -> ColoredString {
    let label = format!("{:?}", state);
    match state {
        SessionState::Transferring => label.bright_green(),
        SessionState::Listening => label.bright_yellow(),
        SessionState::Idle => label.normal(),
        SessionState::PowerOff | SessionState::Unavailable => label.dimmed(),
    }
}
