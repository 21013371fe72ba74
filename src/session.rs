//! Connection-scoped glue between the link, the aggregator and the UI.

use anyhow::anyhow;
use log::{info, warn};

use crate::aggregator::TelemetryAggregator;
use crate::channel::Resolution;
use crate::command::{CommandEncoding, CommandSink, DeviceCommand};
use crate::config::TelemetryConfig;
use crate::latch::RequestLatch;
use crate::link::{LinkEvent, LinkStatus};
use crate::payload::CellFrame;

pub struct Session<S> {
    aggregator: TelemetryAggregator,
    sink: S,
    encoding: CommandEncoding,
    status: LinkStatus,
    selected: Resolution,
    history_1h: RequestLatch,
    history_12h: RequestLatch,
    deviations: Option<CellFrame>,
    view_dirty: bool,
}

impl<S: CommandSink> Session<S> {
    pub fn new(telemetry: TelemetryConfig, encoding: CommandEncoding, sink: S) -> Self {
        Self {
            aggregator: TelemetryAggregator::new(telemetry),
            sink,
            encoding,
            status: LinkStatus::Disconnected,
            selected: Resolution::Fine,
            history_1h: RequestLatch::Idle,
            history_12h: RequestLatch::Idle,
            deviations: None,
            view_dirty: true,
        }
    }

    pub fn aggregator(&self) -> &TelemetryAggregator {
        &self.aggregator
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == LinkStatus::Connected
    }

    pub fn selected(&self) -> Resolution {
        self.selected
    }

    /// Latest per-cell spread reported by the device, in device units.
    pub fn deviations(&self) -> Option<&CellFrame> {
        self.deviations.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn handle(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Status(status) => self.set_status(status),
            LinkEvent::Values(data) => {
                // rejected payloads are logged by the aggregator
                let _ = self.aggregator.ingest_payload(&data);
            }
            LinkEvent::Deviations(data) => {
                match CellFrame::decode_all(&data, self.aggregator.config().cells) {
                    Ok(frames) => self.deviations = frames.into_iter().last(),
                    Err(e) => warn!("rejecting deviations payload: {e}"),
                }
            }
            LinkEvent::History(resolution, data) => {
                if self.aggregator.ingest_history_payload(resolution, &data).is_ok()
                    && resolution == self.selected
                {
                    self.view_dirty = true;
                }
            }
        }
    }

    /// Switches the plotted resolution. The first pick of 1h or 12h in a
    /// connection also asks the device for its stored history.
    pub fn select(&mut self, resolution: Resolution) {
        if resolution != self.selected {
            self.selected = resolution;
            self.view_dirty = true;
        }
        if let Some(latch) = self.latch_mut(resolution) {
            latch.request();
        }
        self.send_history_requests();
    }

    /// Parses user text and forwards it to the device without waiting.
    pub fn submit_command(&mut self, text: &str) -> anyhow::Result<()> {
        if !self.is_connected() {
            return Err(anyhow!("not connected"));
        }
        let command = DeviceCommand::parse(text, self.encoding, self.aggregator.config().cells)?;
        info!("sending command {command:?}");
        self.sink.write(command)
    }

    /// Whether the plot needs rebuilding since the last call. Clears the flags.
    pub fn take_redraw(&mut self) -> bool {
        let fine = self.aggregator.take_fine_ready();
        let view = std::mem::take(&mut self.view_dirty);
        fine || view
    }

    fn set_status(&mut self, status: LinkStatus) {
        info!("link {status}");
        if status == LinkStatus::Connected && self.status != LinkStatus::Connected {
            self.aggregator.reset();
            self.deviations = None;
            self.history_1h.reset();
            self.history_12h.reset();
            self.view_dirty = true;
            self.status = status;
            if let Some(latch) = self.latch_mut(self.selected) {
                latch.request();
            }
            self.send_history_requests();
        } else {
            self.status = status;
        }
    }

    fn send_history_requests(&mut self) {
        if !self.is_connected() {
            return;
        }
        for resolution in [Resolution::Medium, Resolution::Coarse] {
            let fire = self.latch_mut(resolution).is_some_and(|latch| latch.fulfil());
            if fire {
                if let Err(e) = self.sink.request_history(resolution) {
                    warn!("history {resolution} request failed: {e}");
                }
            }
        }
    }

    fn latch_mut(&mut self, resolution: Resolution) -> Option<&mut RequestLatch> {
        match resolution {
            Resolution::Fine => None,
            Resolution::Medium => Some(&mut self.history_1h),
            Resolution::Coarse => Some(&mut self.history_12h),
        }
    }
}
