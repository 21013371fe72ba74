//! BLE link to the balancer: scan by name, connect, subscribe, forward
//! notifications to the UI thread and write commands back. Reconnects forever.

use std::fmt;
use std::future::Future;
use std::sync::mpsc::Sender;
use std::time::Duration;

use anyhow::anyhow;
use btleplug::api::{
    Central, Characteristic, Manager as _, Peripheral as _, PeripheralProperties, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use egui::Context;
use futures::stream::StreamExt;
use log::{debug, info, warn};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

use crate::channel::Resolution;
use crate::command::{CommandSink, DeviceCommand};
use crate::config::{DeviceConfig, GattConfig};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkStatus {
    Scanning,
    Connecting,
    Connected,
    Disconnected,
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkStatus::Scanning => "scanning",
            LinkStatus::Connecting => "connecting",
            LinkStatus::Connected => "connected",
            LinkStatus::Disconnected => "disconnected",
        };
        f.write_str(s)
    }
}

/// What the link hands to the UI thread. Payloads are raw notification bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    Status(LinkStatus),
    Values(Vec<u8>),
    Deviations(Vec<u8>),
    History(Resolution, Vec<u8>),
}

#[derive(Debug, Clone)]
pub enum LinkCommand {
    Write(DeviceCommand),
    RequestHistory(Resolution),
}

/// UI side of the command path.
#[derive(Clone)]
pub struct LinkHandle {
    tx: UnboundedSender<LinkCommand>,
}

impl CommandSink for LinkHandle {
    fn write(&mut self, command: DeviceCommand) -> anyhow::Result<()> {
        self.tx
            .send(LinkCommand::Write(command))
            .map_err(|_| anyhow!("link stopped"))
    }

    fn request_history(&mut self, resolution: Resolution) -> anyhow::Result<()> {
        self.tx
            .send(LinkCommand::RequestHistory(resolution))
            .map_err(|_| anyhow!("link stopped"))
    }
}

struct Events {
    tx: Sender<LinkEvent>,
    ctx: Context,
}

impl Events {
    /// Returns `false` once the UI has gone away.
    fn emit(&self, event: LinkEvent) -> bool {
        let sent = self.tx.send(event).is_ok();
        self.ctx.request_repaint();
        sent
    }
}

enum Flow {
    Reconnect,
    Stop,
}

pub struct BalancerLink {
    device: DeviceConfig,
    gatt: GattConfig,
    tx: Sender<LinkEvent>,
    commands: UnboundedReceiver<LinkCommand>,
}

impl BalancerLink {
    pub fn new(device: DeviceConfig, gatt: GattConfig, tx: Sender<LinkEvent>) -> (Self, LinkHandle) {
        let (cmd_tx, commands) = mpsc::unbounded_channel();
        let link = Self {
            device,
            gatt,
            tx,
            commands,
        };
        (link, LinkHandle { tx: cmd_tx })
    }

    pub async fn run(mut self, egui_ctx: &Context) -> anyhow::Result<()> {
        let events = Events {
            tx: self.tx.clone(),
            ctx: egui_ctx.clone(),
        };

        let manager = Manager::new().await?;

        // get the first bluetooth adapter
        let adapters = manager.adapters().await?;
        let central = adapters
            .into_iter()
            .next()
            .ok_or(btleplug::Error::DeviceNotFound)?;

        let retry = Duration::from_millis(self.device.retry_delay_ms);
        loop {
            if !events.emit(LinkEvent::Status(LinkStatus::Scanning)) {
                return Ok(());
            }

            match self.find_balancer(&central).await {
                Ok(Some(balancer)) => {
                    let flow = self.serve(&events, &balancer).await;
                    if let Err(e) = balancer.disconnect().await {
                        debug!("disconnect: {e}");
                    }
                    if !events.emit(LinkEvent::Status(LinkStatus::Disconnected)) {
                        return Ok(());
                    }
                    match flow {
                        Ok(Flow::Stop) => return Ok(()),
                        Ok(Flow::Reconnect) => info!("connection lost, reconnecting"),
                        Err(e) => warn!("connection terminated: {e:#}"),
                    }
                }
                Ok(None) => debug!("{} not found, rescanning", self.device.name),
                Err(e) => warn!("scan failed: {e}"),
            }

            tokio::time::sleep(retry).await;
        }
    }

    async fn find_balancer(&self, central: &Adapter) -> anyhow::Result<Option<Peripheral>> {
        central.start_scan(ScanFilter::default()).await?;
        tokio::time::sleep(Duration::from_secs(self.device.scan_secs)).await;

        let found = self.match_peripherals(central).await;
        central.stop_scan().await?;
        found
    }

    async fn match_peripherals(&self, central: &Adapter) -> anyhow::Result<Option<Peripheral>> {
        for p in central.peripherals().await? {
            let name = advertised_name(p.properties().await);
            if name.as_deref() == Some(self.device.name.as_str()) {
                return Ok(Some(p));
            }
        }
        Ok(None)
    }

    async fn serve(&mut self, events: &Events, balancer: &Peripheral) -> anyhow::Result<Flow> {
        events.emit(LinkEvent::Status(LinkStatus::Connecting));
        info!("connecting to balancer: {}", balancer.address());
        let connect_timeout = Duration::from_secs(self.device.connect_timeout_secs);
        tokio::time::timeout(connect_timeout, balancer.connect())
            .await
            .map_err(|_| anyhow!("connect timed out after {connect_timeout:?}"))??;

        info!("discovering services");
        balancer.discover_services().await?;
        let chars = balancer.characteristics();
        let find = |uuid: Uuid| -> anyhow::Result<Characteristic> {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or_else(|| anyhow!("characteristic {uuid} not found"))
        };

        let gatt = self.gatt.clone();
        let commands = &mut self.commands;
        let values = find(gatt.values)?;
        let pwm_set = find(gatt.pwm_set)?;

        info!("subscribing to values");
        balancer.subscribe(&values).await?;
        match find(gatt.deviations) {
            Ok(deviations) => balancer.subscribe(&deviations).await?,
            Err(e) => warn!("{e}, deviations unavailable"),
        }

        let mut stream = balancer.notifications().await?;

        // drop anything queued for a previous connection
        while commands.try_recv().is_ok() {}

        if !events.emit(LinkEvent::Status(LinkStatus::Connected)) {
            return Ok(Flow::Stop);
        }

        let mut liveness = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                notification = stream.next() => {
                    let Some(notification) = notification else {
                        return Ok(Flow::Reconnect);
                    };
                    if let Some(event) = classify(&gatt, notification.uuid, notification.value) {
                        if !events.emit(event) {
                            return Ok(Flow::Stop);
                        }
                    }
                }
                command = commands.recv() => match command {
                    Some(LinkCommand::Write(command)) => {
                        let balancer = balancer.clone();
                        let pwm_set = pwm_set.clone();
                        spawn_write(
                            move |payload| async move {
                                balancer.write(&pwm_set, &payload, WriteType::WithResponse).await
                            },
                            command,
                        );
                    }
                    Some(LinkCommand::RequestHistory(resolution)) => {
                        let uuid = match resolution {
                            Resolution::Medium => Some(gatt.history_1h),
                            Resolution::Coarse => Some(gatt.history_12h),
                            Resolution::Fine => None,
                        };
                        match uuid.map(&find) {
                            Some(Ok(history)) => {
                                info!("subscribing to {resolution} history");
                                balancer.subscribe(&history).await?;
                            }
                            Some(Err(e)) => warn!("{e}, {resolution} history unavailable"),
                            None => {}
                        }
                    }
                    None => return Ok(Flow::Stop),
                },
                _ = liveness.tick() => {
                    if !balancer.is_connected().await? {
                        return Ok(Flow::Reconnect);
                    }
                }
            }
        }
    }
}

/// Writes `command` on its own task so notifications keep flowing while the
/// device acknowledges. A failed write is logged and the connection stays up.
fn spawn_write<W, Fut>(write: W, command: DeviceCommand) -> tokio::task::JoinHandle<()>
where
    W: FnOnce(Vec<u8>) -> Fut,
    Fut: Future<Output = btleplug::Result<()>> + Send + 'static,
{
    let pending = write(command.encode());
    tokio::spawn(async move {
        match pending.await {
            Ok(()) => debug!("command {command:?} written"),
            Err(e) => warn!("command {command:?} not written: {e}"),
        }
    })
}

/// Local name of a scanned peripheral. Peripherals whose properties cannot be
/// read are skipped.
fn advertised_name(properties: btleplug::Result<Option<PeripheralProperties>>) -> Option<String> {
    match properties {
        Ok(props) => {
            let name = props.and_then(|props| props.local_name)?;
            debug!("discovered: {name}");
            Some(name)
        }
        Err(e) => {
            debug!("skipping peripheral: {e}");
            None
        }
    }
}

fn classify(gatt: &GattConfig, uuid: Uuid, value: Vec<u8>) -> Option<LinkEvent> {
    debug!("rx {uuid}: {value:02x?}");
    if uuid == gatt.values {
        Some(LinkEvent::Values(value))
    } else if uuid == gatt.deviations {
        Some(LinkEvent::Deviations(value))
    } else if uuid == gatt.history_1h {
        Some(LinkEvent::History(Resolution::Medium, value))
    } else if uuid == gatt.history_12h {
        Some(LinkEvent::History(Resolution::Coarse, value))
    } else {
        debug!("ignoring notification from {uuid}");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_reports_stopped_link() {
        let (tx, _rx) = std::sync::mpsc::channel();
        let (link, mut handle) = BalancerLink::new(DeviceConfig::default(), GattConfig::default(), tx);
        handle.request_history(Resolution::Medium).unwrap();
        drop(link);
        assert!(handle.request_history(Resolution::Coarse).is_err());
    }

    #[test]
    fn notifications_are_routed_by_characteristic() {
        let gatt = GattConfig::default();
        assert_eq!(classify(&gatt, gatt.values, vec![1]), Some(LinkEvent::Values(vec![1])));
        assert_eq!(
            classify(&gatt, gatt.history_12h, vec![2]),
            Some(LinkEvent::History(Resolution::Coarse, vec![2]))
        );
        assert_eq!(classify(&gatt, gatt.pwm_set, vec![3]), None);
    }

    fn pwm(text: &str) -> DeviceCommand {
        DeviceCommand::parse(text, crate::command::CommandEncoding::AsciiCsv, 8).unwrap()
    }

    #[tokio::test]
    async fn failed_write_does_not_propagate() {
        let handle = spawn_write(
            |_| async { Err::<(), _>(btleplug::Error::NotConnected) },
            pwm("0, 0, 0, 0, 0, 0, 0, 0"),
        );
        assert!(handle.await.is_ok());
    }

    #[tokio::test]
    async fn slow_write_does_not_hold_up_the_caller() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = spawn_write(
            move |payload| async move {
                let _ = tx.send(payload);
                futures::future::pending::<btleplug::Result<()>>().await
            },
            pwm("0, 10, 0, 0, 0, 0, 0, 0"),
        );
        // spawn_write has returned while the write is still outstanding
        assert_eq!(rx.await.unwrap(), b"0,10,0,0,0,0,0,0".to_vec());
        assert!(!handle.is_finished());
        handle.abort();
    }

    #[test]
    fn unreadable_peripherals_are_skipped() {
        assert_eq!(advertised_name(Err(btleplug::Error::DeviceNotFound)), None);
        assert_eq!(advertised_name(Ok(None)), None);
        let props = PeripheralProperties {
            local_name: Some("8-Cell Balancer".into()),
            ..Default::default()
        };
        assert_eq!(advertised_name(Ok(Some(props))), Some("8-Cell Balancer".into()));
    }

    #[test]
    fn status_labels() {
        assert_eq!(LinkStatus::Connected.to_string(), "connected");
        assert_eq!(LinkStatus::Scanning.to_string(), "scanning");
    }
}
