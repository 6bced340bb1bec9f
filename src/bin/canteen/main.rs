//! The kiosk controller.
//!
//! Opens the touch display, starts the proximity monitor, and dispatches
//! display frames to the command handler until SIGINT or SIGTERM.

use canteen::{
    args::{KioskArgs, KioskCommand},
    card_reader::{CardReader, NfcList},
    config::{secs, KioskConfig},
    display::{Page, Screen},
    gui::device_selector,
    handler::CommandHandler,
    orchestrator::Orchestrator,
    proximity::{sensor_factory, ProximityDetector},
    recognizer::CommandRecognizer,
    services::CommandServices,
    shutdown,
    telemetry::{TelemetrySink, ThingsBoard},
    transport::SerialTransport,
};

use clap::Parser;
use log::{error, info, warn};
use std::{error::Error, path::PathBuf, process, sync::Arc, time::Duration};

/// How often the main thread checks for a shutdown request.
const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

// Example:
// cargo run --bin canteen -- --port /dev/ttyUSB0 --simulate
// cargo run --bin canteen -- read-card --timeout 5
// cargo run --bin canteen -- --port /dev/ttyUSB0 send "page menu"

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = KioskArgs::parse();

    let mut config = match KioskConfig::from_path_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!("Could not load {}: {}", args.config.display(), e);
            process::exit(1);
        }
    };
    args.apply(&mut config);

    let result = match &args.command {
        None | Some(KioskCommand::Run) => run(&config, args.simulate),
        Some(KioskCommand::ReadCard(cmd)) => read_card(&config, cmd.timeout),
        Some(KioskCommand::Send(cmd)) => send(&config, &cmd.command),
    };
    if let Err(e) = result {
        error!("{}", e);
        process::exit(1);
    }
}

/// The configured port, or one picked interactively.
fn choose_port(config: &KioskConfig) -> Result<PathBuf, Box<dyn Error>> {
    if let Some(port) = &config.serial.port {
        return Ok(PathBuf::from(port));
    }
    let ports = SerialTransport::available_ports();
    device_selector(ports)?.ok_or_else(|| "no serial device selected".into())
}

fn open_transport(config: &KioskConfig) -> Result<Arc<SerialTransport>, Box<dyn Error>> {
    let port = choose_port(config)?;
    let transport = Arc::new(SerialTransport::new(
        &port,
        config.serial.baud_rate,
        config.serial.poll_interval(),
    ));
    if !transport.open() {
        return Err(format!("could not open {}", port.display()).into());
    }
    Ok(transport)
}

fn run(config: &KioskConfig, simulate: bool) -> Result<(), Box<dyn Error>> {
    shutdown::install()?;
    let transport = open_transport(config)?;

    let card_reader = Arc::new(CardReader::new(Arc::new(NfcList::new(&config.card)), &config.card));
    let orchestrator = Orchestrator::new(transport.clone(), card_reader.clone(), &config.card);
    let handler = Arc::new(CommandHandler::new(
        transport.clone(),
        Arc::new(CommandServices::new(&config.services)),
        Arc::new(CommandRecognizer::new(&config.recording)),
        card_reader.clone(),
        orchestrator.clone(),
        &config.recording,
        &config.display,
    ));

    let th_handler = handler.clone();
    if !transport.start_listening(move |byte| th_handler.handle_frame(byte)) {
        return Err("could not start listening to the display".into());
    }

    let mut detector = ProximityDetector::new(&config.proximity, sensor_factory(&config.proximity, simulate));
    if let Some(telemetry) = &config.telemetry {
        match ThingsBoard::new(telemetry) {
            Ok(sink) => detector = detector.with_telemetry(Arc::new(sink) as Arc<dyn TelemetrySink>),
            Err(e) => warn!("Telemetry disabled: {}", e),
        }
    }
    orchestrator.start_proximity(detector);

    transport.show_page(Page::Start);
    info!("Kiosk ready");
    shutdown::wait(SHUTDOWN_POLL);

    info!("Shutting down");
    transport.stop_listening();
    orchestrator.shutdown();
    handler.shutdown();
    transport.close();
    info!("Bye");
    Ok(())
}

fn read_card(config: &KioskConfig, timeout: f64) -> Result<(), Box<dyn Error>> {
    let reader = CardReader::new(Arc::new(NfcList::new(&config.card)), &config.card);
    info!("Present a card within {} s", timeout);
    match reader.read_once(secs(timeout)) {
        Some(uid) => {
            println!("{}", uid);
            Ok(())
        }
        None => Err("no card read".into()),
    }
}

fn send(config: &KioskConfig, command: &str) -> Result<(), Box<dyn Error>> {
    let transport = open_transport(config)?;
    let sent = transport.send_display_command(command);
    transport.close();
    if sent {
        Ok(())
    } else {
        Err(format!("could not send {:?}", command).into())
    }
}
