use std::thread;
use std::time::Duration;

use clap::Parser;

use tracing::{error, info};

use wiotp_managed::client::ManagedClient;
use wiotp_managed::config::{ManageParams, ManagedConfig};
use wiotp_managed::dispatcher::{DeviceAction, DeviceActionRequest, Handlers};
use wiotp_managed::firmware::FirmwareRequest;
use wiotp_managed::mqtt::MqttTransport;
use wiotp_managed::wiotp::codec::{JSON_FORMAT, Payload};
use wiotp_managed::wiotp::device::{DeviceInfo, DeviceProperty};
use wiotp_managed::wiotp::firmware::{FirmwareAction, FirmwareState, UpdateStatus};
use wiotp_managed::wiotp::identity::Identity;
use wiotp_managed::wiotp::message::LogSeverity;
use wiotp_managed::transport::QoS;

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Organization identifier.
    #[arg(long)]
    org: Option<String>,

    /// Device type.
    #[arg(long = "type")]
    type_id: Option<String>,

    /// Device identifier.
    #[arg(long = "id")]
    device_id: Option<String>,

    /// Authentication token.
    #[arg(long)]
    token: Option<String>,

    /// Lease lifetime in seconds.
    #[arg(long, default_value_t = 3600)]
    lifetime: u64,

    /// Interval between two status events, in seconds.
    #[arg(long, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    interval: u64,
}

impl Cli {
    fn config(self) -> wiotp_managed::error::Result<ManagedConfig> {
        let config = match (self.org, self.type_id, self.device_id, self.token) {
            (Some(org), Some(type_id), Some(device_id), Some(token)) => {
                ManagedConfig::new(Identity::device(org, type_id, device_id)).auth_token(token)
            }
            _ => ManagedConfig::from_env()?,
        };

        Ok(config
            .manage_params(
                ManageParams::new(self.lifetime)
                    .device_actions()
                    .firmware_actions(),
            )
            .device_info(
                DeviceInfo::new()
                    .with(DeviceProperty::Manufacturer, "Acme")
                    .with(DeviceProperty::Model, "managed-device")
                    .with(DeviceProperty::FwVersion, "1.0.0"),
            ))
    }
}

fn device_action(request: DeviceActionRequest) {
    match request.action() {
        DeviceAction::Reboot => {
            info!("Rebooting device");
            request.respond(202, "");
        }
        DeviceAction::FactoryReset => {
            request.respond(500, "Factory reset is not supported by this device");
        }
    }
}

fn firmware_action(request: FirmwareRequest) {
    let handle = request.handle();
    match request.action() {
        FirmwareAction::Download => {
            info!(
                "Downloading firmware from {}",
                request.firmware().uri.as_deref().unwrap_or("unknown location")
            );
            handle.set_state(FirmwareState::Downloading);
            thread::sleep(Duration::from_secs(5));
            handle.set_state(FirmwareState::Downloaded);
        }
        FirmwareAction::Update => {
            info!("Installing firmware");
            thread::sleep(Duration::from_secs(5));
            handle.set_update_status(UpdateStatus::Success);
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing subscriber.
    tracing_subscriber::fmt().init();

    let cli = Cli::parse();
    let interval = Duration::from_secs(cli.interval);
    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let handlers = Handlers::new()
        .on_device_action(device_action)
        .on_firmware_action(firmware_action)
        .on_command(|command| {
            info!(
                "Command `{}` received: {:?}",
                command.command, command.payload
            );
        });

    let (transport, eventloop) = MqttTransport::connect(&config);
    let client = match ManagedClient::with_handlers(config, transport, handlers) {
        Ok(client) => client,
        Err(e) => {
            error!("{e}");
            return;
        }
    };

    let eventloop = tokio::spawn(eventloop.run(client.clone()));

    let mut ticks = tokio::time::interval(interval);
    let mut count = 0u64;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticks.tick() => {}
        }

        count += 1;
        let payload = Payload::Json(serde_json::json!({ "count": count }));
        if let Err(e) = client
            .publish_event("status", JSON_FORMAT, &payload, QoS::AtLeastOnce)
            .await
        {
            error!("{e}");
        }

        if count % 10 == 0 {
            if let Err(e) = client
                .add_log("Heartbeat", count.to_string(), LogSeverity::Info)
                .await
            {
                error!("{e}");
            }
        }
    }

    client.shutdown();
    let _ = eventloop.await;
}
