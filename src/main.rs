//! Command line front end for Even G1 glasses.
//!
//! `pair` scans for a left/right pair and remembers it; every other command
//! reconnects the remembered pair, sends one command and exits.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use g1_glasses::domain::models::{AppEvent, ConnectionState, MessageSeverity, NotificationApp};
use g1_glasses::domain::settings::SettingsService;
use g1_glasses::infrastructure::bluetooth::protocol::command::{GlassesCommand, InfoQuery};
use g1_glasses::infrastructure::bluetooth::protocol::config::{Note, TimeWeather, WeatherIcon};
use g1_glasses::infrastructure::bluetooth::protocol::device::{Notification, NotificationAllowList};
use g1_glasses::infrastructure::bluetooth::{BtleplugTransport, GlassesSession, SessionHandle};
use g1_glasses::infrastructure::logging;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Time for queued writes and their acknowledgements before exiting.
const FLUSH_DELAY: Duration = Duration::from_millis(500);
/// Time for the device info queries to be answered.
const QUERY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "g1-glasses")]
#[command(about = "Control Even G1 smart glasses over BLE")]
struct Cli {
    /// Settings file (defaults to the per-user config directory)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan for a left/right pair and remember it
    Pair,
    /// Forget the remembered pair
    Forget,
    /// Connect and print battery, display and wear state
    Status,
    /// Show text on the display
    Text {
        text: String,
        /// Seconds to keep the text up before closing it
        #[arg(long, default_value = "5")]
        hold: u64,
    },
    /// Set display brightness (0-63)
    Brightness {
        level: u8,
        #[arg(long)]
        auto: bool,
    },
    /// Turn silent mode on or off
    Silent {
        #[arg(action = clap::ArgAction::Set)]
        enabled: bool,
    },
    /// Set the head-up activation angle (0-60 degrees)
    HeadTilt { angle: u8 },
    /// Position the dashboard
    DashPosition {
        /// 1 (lowest) to 8
        #[arg(long)]
        vertical: u8,
        /// 1 (closest) to 9
        #[arg(long)]
        distance: u8,
        #[arg(long)]
        hide: bool,
    },
    /// Push the local time and a temperature to the dashboard
    Clock {
        #[arg(long, default_value = "20")]
        temperature: u8,
        #[arg(long)]
        fahrenheit: bool,
        #[arg(long)]
        twelve_hour: bool,
    },
    /// Mirror a notification
    Notify {
        title: String,
        message: String,
        #[arg(long, default_value = "")]
        subtitle: String,
    },
    /// Replace the dashboard notes with a single note
    Note { title: String, text: String },
    /// Close whatever is on the display
    Exit,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = match cli.settings {
        Some(path) => SettingsService::from_path(path),
        None => SettingsService::new()?,
    };
    let _log_guard = logging::init_logger(&settings.get().log_settings)?;
    info!("Starting g1-glasses");
    let settings = Arc::new(Mutex::new(settings));

    match cli.command {
        Commands::Forget => {
            lock(&settings)?.forget_glasses()?;
            println!("Forgot the remembered glasses");
            Ok(())
        }
        Commands::Pair => pair(&settings).await,
        command => run_command(&settings, command).await,
    }
}

fn lock(settings: &Arc<Mutex<SettingsService>>) -> Result<std::sync::MutexGuard<'_, SettingsService>> {
    settings.lock().map_err(|_| anyhow!("Lock error"))
}

async fn start_session(settings: &Arc<Mutex<SettingsService>>, restore: bool) -> Result<SessionHandle> {
    let (config, known, timeout) = {
        let s = lock(settings)?;
        let s = s.get();
        (
            s.session_config(),
            s.known_glasses.clone(),
            Duration::from_secs(s.scan_timeout_secs),
        )
    };

    let restored = match (&known, restore) {
        (Some(known), true) => vec![known.left.clone(), known.right.clone()],
        _ => Vec::new(),
    };
    let (transport_tx, transport_rx) = mpsc::unbounded_channel();
    let transport = BtleplugTransport::new(transport_tx, timeout)
        .await
        .context("Bluetooth is not available")?
        .with_restored(restored);

    let (event_tx, event_rx) = mpsc::unbounded_channel();
    tokio::spawn(forward_events(event_rx, settings.clone()));

    Ok(GlassesSession::spawn(
        Arc::new(transport),
        transport_rx,
        config,
        known,
        event_tx,
    ))
}

async fn forward_events(mut events: mpsc::UnboundedReceiver<AppEvent>, settings: Arc<Mutex<SettingsService>>) {
    while let Some(event) = events.recv().await {
        match event {
            AppEvent::LogMessage(status) => match status.severity {
                MessageSeverity::Error => error!("{}", status.message),
                MessageSeverity::Warning => warn!("{}", status.message),
                MessageSeverity::Info | MessageSeverity::Success => info!("{}", status.message),
            },
            AppEvent::PairConnected(glasses) => {
                let saved = lock(&settings).and_then(|mut s| s.set_known_glasses(glasses));
                if let Err(e) = saved {
                    warn!("Could not remember glasses: {}", e);
                }
            }
            AppEvent::NotificationAppAdded(app) => {
                info!("Glasses allow notifications from {} ({})", app.display_name, app.app_identifier)
            }
            AppEvent::TransferFailed(side, e) => warn!("Image transfer to {} earpiece failed: {}", side, e),
            AppEvent::ConnectionState(state) => debug!("Connection state: {:?}", state),
        }
    }
}

async fn wait_active(handle: &SessionHandle, timeout: Duration) -> Result<()> {
    let mut state = handle.state();
    let result = tokio::time::timeout(timeout, state.wait_for(|s| *s == ConnectionState::Active))
        .await
        .context("Timed out waiting for the glasses")?
        .map(|_| ())
        .map_err(|_| anyhow!("Session stopped"));
    result
}

async fn pair(settings: &Arc<Mutex<SettingsService>>) -> Result<()> {
    let timeout = Duration::from_secs(lock(settings)?.get().scan_timeout_secs);
    let handle = start_session(settings, false).await?;
    handle.start_pairing()?;
    println!("Scanning for glasses, open the case lid...");

    if let Err(e) = wait_active(&handle, timeout).await {
        handle.stop_pairing()?;
        return Err(e);
    }
    // Let the PairConnected event reach the settings.
    tokio::time::sleep(FLUSH_DELAY).await;

    match &lock(settings)?.get().known_glasses {
        Some(known) => println!("Paired {} / {}", known.left_name, known.right_name),
        None => println!("Paired"),
    }
    Ok(())
}

async fn run_command(settings: &Arc<Mutex<SettingsService>>, command: Commands) -> Result<()> {
    let (timeout, app) = {
        let s = lock(settings)?;
        let s = s.get();
        if s.known_glasses.is_none() {
            bail!("No glasses remembered yet; run `g1-glasses pair` first");
        }
        (
            Duration::from_secs(s.scan_timeout_secs),
            NotificationApp {
                app_identifier: s.notification_app_identifier.clone(),
                display_name: s.notification_display_name.clone(),
            },
        )
    };

    let handle = start_session(settings, true).await?;
    wait_active(&handle, timeout).await?;

    match command {
        Commands::Status => {
            for query in [InfoQuery::Firmware, InfoQuery::DeviceSerialNumber] {
                handle.send_command(GlassesCommand::Query(query)).await?;
            }
            tokio::time::sleep(QUERY_DELAY).await;
            print_status(&handle);
        }
        Commands::Text { text, hold } => {
            handle.send_command(GlassesCommand::Text(text)).await?;
            tokio::time::sleep(Duration::from_secs(hold)).await;
            handle.send_command(GlassesCommand::Exit).await?;
        }
        Commands::Brightness { level, auto } => {
            handle.send_command(GlassesCommand::Brightness { level, auto }).await?;
        }
        Commands::Silent { enabled } => handle.send_command(GlassesCommand::SilentMode(enabled)).await?,
        Commands::HeadTilt { angle } => handle.send_command(GlassesCommand::HeadTilt(angle)).await?,
        Commands::DashPosition {
            vertical,
            distance,
            hide,
        } => {
            handle
                .send_command(GlassesCommand::DashPosition {
                    show: !hide,
                    vertical,
                    distance,
                })
                .await?
        }
        Commands::Clock {
            temperature,
            fahrenheit,
            twelve_hour,
        } => {
            let weather = TimeWeather {
                local_time: chrono::Local::now().naive_local(),
                icon: WeatherIcon::Sunny,
                temperature,
                fahrenheit,
                twelve_hour,
            };
            handle.send_command(GlassesCommand::DashTimeWeather(weather)).await?;
        }
        Commands::Notify {
            title,
            message,
            subtitle,
        } => {
            let allow = NotificationAllowList {
                apps: Some(vec![app.clone()]),
                ..NotificationAllowList::default()
            };
            handle.send_command(GlassesCommand::NotificationAllowList(allow)).await?;
            let notification = Notification::new(app.app_identifier, app.display_name, title, subtitle, message);
            handle.send_command(GlassesCommand::Notify(notification)).await?;
        }
        Commands::Note { title, text } => {
            handle.send_command(GlassesCommand::Notes(vec![Note { title, text }])).await?;
        }
        Commands::Exit => handle.send_command(GlassesCommand::Exit).await?,
        Commands::Pair | Commands::Forget => {}
    }

    tokio::time::sleep(FLUSH_DELAY).await;
    Ok(())
}

fn print_status(handle: &SessionHandle) {
    let s = handle.store().snapshot();
    let percent = |level: Option<u8>| level.map_or_else(|| "?".to_string(), |l| format!("{}%", l));
    println!("Battery:     L {} / R {}", percent(s.left_battery), percent(s.right_battery));
    println!("Case:        {} {}", percent(s.case_battery), if s.case_charging { "(charging)" } else { "" });
    println!(
        "Brightness:  {}{}",
        s.brightness,
        if s.auto_brightness { " (auto)" } else { "" }
    );
    println!("Silent mode: {}", s.silent_mode);
    println!("Head-up:     {} degrees", s.heads_up_angle);
    println!("Dashboard:   vertical {}, distance {}", s.dash_vertical, s.dash_distance);
    println!("Wear state:  {:?}", s.wear_state);
    if let Some(firmware) = &s.firmware {
        println!("Firmware:    {}", firmware);
    }
    if let Some(serial) = &s.device_serial {
        println!("Serial:      {}", serial);
    }
}
