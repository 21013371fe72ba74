//! Multi-resolution rolling telemetry.
//!
//! Every channel owns one [`RollingWindow`] per [`Resolution`]. Fine samples
//! arrive one batch per device notification; every `fine_to_medium` of them
//! the tail of each fine window is averaged into the medium window, and every
//! `fine_to_medium * medium_to_coarse` the tail of the medium window is
//! averaged into the coarse window. The cadence is driven by a sample counter
//! alone.

use log::{debug, warn};

use crate::channel::{Channel, Quantity, Resolution};
use crate::config::TelemetryConfig;
use crate::error::TelemetryError;
use crate::payload::{CellFrame, HistoryPage};
use crate::window::RollingWindow;

/// Data readiness of the aggregator. Purely observational.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Nothing ingested since the last reset.
    Empty,
    /// Fine samples arrived but no rollup has fired yet.
    Warming,
    /// At least one rollup has fired.
    Steady,
}

pub struct TelemetryAggregator {
    config: TelemetryConfig,
    windows: Vec<RollingWindow>,
    sample_count: u64,
    history_written: bool,
    fine_ready: bool,
}

impl TelemetryAggregator {
    pub fn new(config: TelemetryConfig) -> Self {
        let count = Resolution::ALL.len() * Quantity::ALL.len() * config.cells;
        let windows = (0..count).map(|_| RollingWindow::new(config.capacity)).collect();
        Self {
            config,
            windows,
            sample_count: 0,
            history_written: false,
            fine_ready: false,
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn channel_count(&self) -> usize {
        self.config.cells * Quantity::ALL.len()
    }

    /// Fine samples ingested since construction or the last reset.
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    pub fn readiness(&self) -> Readiness {
        if self.sample_count >= self.config.fine_to_medium as u64 {
            Readiness::Steady
        } else if self.sample_count > 0 || self.history_written {
            Readiness::Warming
        } else {
            Readiness::Empty
        }
    }

    /// Ingests one synchronized batch holding exactly one raw value per channel.
    ///
    /// The batch is rejected whole if a channel is missing, repeated or unknown.
    pub fn ingest_fine<I>(&mut self, samples: I) -> Result<(), TelemetryError>
    where
        I: IntoIterator<Item = (Channel, i16)>,
    {
        let expected = self.channel_count();
        let mut staged: Vec<Option<i16>> = vec![None; expected];
        let mut actual = 0;
        let mut consistent = true;
        for (channel, raw) in samples {
            actual += 1;
            match self.slot(channel) {
                Some(slot) if staged[slot].is_none() => staged[slot] = Some(raw),
                _ => consistent = false,
            }
        }
        if !consistent || actual != expected {
            return Err(TelemetryError::InvalidChannelSet { expected, actual });
        }

        for (channel, raw) in Channel::all(self.config.cells).zip(staged.into_iter().flatten()) {
            let value = self.scale(raw);
            self.window_mut(channel, Resolution::Fine).push(Some(value));
        }
        self.sample_count += 1;
        self.fine_ready = true;
        self.rollup();
        Ok(())
    }

    /// Decodes a `values` payload and ingests every frame in it, in order.
    /// Returns the number of fine samples written.
    pub fn ingest_payload(&mut self, data: &[u8]) -> Result<usize, TelemetryError> {
        let frames = CellFrame::decode_all(data, self.config.cells).inspect_err(|e| {
            warn!("rejecting values payload: {e}");
        })?;
        for frame in &frames {
            self.ingest_fine(frame.readings())?;
        }
        Ok(frames.len())
    }

    /// Writes replayed history pages straight into the window of `resolution`,
    /// bypassing rollup. Invalid pages are skipped. Returns the number written.
    pub fn ingest_history_batch(
        &mut self,
        resolution: Resolution,
        pages: &[HistoryPage],
    ) -> Result<usize, TelemetryError> {
        let expected = self.config.cells;
        if let Some(bad) = pages.iter().find(|p| p.frame.cells() != expected) {
            return Err(TelemetryError::InvalidChannelSet {
                expected: self.channel_count(),
                actual: bad.frame.cells() * Quantity::ALL.len(),
            });
        }

        let mut written = 0;
        for page in pages.iter().filter(|p| p.is_valid()) {
            for (channel, raw) in page.frame.readings() {
                let value = self.scale(raw);
                self.window_mut(channel, resolution).push(Some(value));
            }
            written += 1;
        }
        if written > 0 {
            self.history_written = true;
        }
        debug!("history {resolution}: {written} of {} pages written", pages.len());
        Ok(written)
    }

    pub fn ingest_history_payload(
        &mut self,
        resolution: Resolution,
        data: &[u8],
    ) -> Result<usize, TelemetryError> {
        let pages = HistoryPage::decode_all(data, self.config.cells).inspect_err(|e| {
            warn!("rejecting {resolution} history payload: {e}");
        })?;
        self.ingest_history_batch(resolution, &pages)
    }

    /// Snapshot of one window, oldest first, always `capacity` long.
    /// Unknown channels read as an all-empty window.
    pub fn query(&self, channel: Channel, resolution: Resolution) -> Vec<Option<f32>> {
        match self.window(channel, resolution) {
            Some(window) => window.to_vec(),
            None => vec![None; self.config.capacity],
        }
    }

    pub fn window(&self, channel: Channel, resolution: Resolution) -> Option<&RollingWindow> {
        self.index(channel, resolution).map(|i| &self.windows[i])
    }

    pub fn is_fine_ready(&self) -> bool {
        self.fine_ready
    }

    /// Returns whether new fine data arrived since the last call, clearing the flag.
    pub fn take_fine_ready(&mut self) -> bool {
        std::mem::take(&mut self.fine_ready)
    }

    /// Empties every window and restarts the rollup cadence.
    pub fn reset(&mut self) {
        self.windows.iter_mut().for_each(RollingWindow::clear);
        self.sample_count = 0;
        self.history_written = false;
        self.fine_ready = false;
    }

    fn rollup(&mut self) {
        let medium = self.config.fine_to_medium as u64;
        let coarse = medium * self.config.medium_to_coarse as u64;
        if medium == 0 || self.sample_count % medium != 0 {
            return;
        }
        self.roll_into(Resolution::Fine, Resolution::Medium, self.config.fine_to_medium);
        debug!("rolled fine into medium at sample {}", self.sample_count);

        if coarse != 0 && self.sample_count % coarse == 0 {
            self.roll_into(Resolution::Medium, Resolution::Coarse, self.config.medium_to_coarse);
            debug!("rolled medium into coarse at sample {}", self.sample_count);
        }
    }

    fn roll_into(&mut self, from: Resolution, to: Resolution, count: usize) {
        for channel in Channel::all(self.config.cells) {
            let mean = self.window_mut(channel, from).tail_mean(count);
            self.window_mut(channel, to).push(mean);
        }
    }

    fn scale(&self, raw: i16) -> f32 {
        f32::from(raw) / self.config.scale
    }

    fn slot(&self, channel: Channel) -> Option<usize> {
        (channel.cell < self.config.cells)
            .then(|| channel.cell * Quantity::ALL.len() + channel.quantity.index())
    }

    fn index(&self, channel: Channel, resolution: Resolution) -> Option<usize> {
        self.slot(channel)
            .map(|slot| resolution.index() * self.channel_count() + slot)
    }

    fn window_mut(&mut self, channel: Channel, resolution: Resolution) -> &mut RollingWindow {
        // Only reached with channels taken from `Channel::all` or validated frames.
        let slot = channel.cell * Quantity::ALL.len() + channel.quantity.index();
        let index = resolution.index() * self.channel_count() + slot;
        &mut self.windows[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::CELL_COUNT;
    use crate::payload::tests::encode_pairs;

    fn aggregator() -> TelemetryAggregator {
        TelemetryAggregator::new(TelemetryConfig::default())
    }

    fn frame(voltage: i16, current: i16) -> CellFrame {
        CellFrame::new(vec![(voltage, current); CELL_COUNT])
    }

    fn assert_close(actual: Option<f32>, expected: f32) {
        let actual = actual.unwrap();
        assert!((actual - expected).abs() < 1e-4, "{actual} != {expected}");
    }

    #[test]
    fn windows_always_have_full_length() {
        let mut agg = aggregator();
        for n in 0..400 {
            agg.ingest_fine(frame(3300 + (n % 7) as i16, 50).readings()).unwrap();
            for resolution in Resolution::ALL {
                for channel in Channel::all(CELL_COUNT) {
                    assert_eq!(agg.query(channel, resolution).len(), 121);
                }
            }
        }
        assert_eq!(agg.query(Channel::voltage(42), Resolution::Fine), vec![None; 121]);
    }

    #[test]
    fn scales_fixed_point_to_physical_units() {
        let mut agg = aggregator();
        let pairs: Vec<(i16, i16)> = (0..8).map(|k| (3300 + 10 * k, 50 + 2 * k)).collect();
        agg.ingest_payload(&encode_pairs(&pairs)).unwrap();

        let v0 = agg.query(Channel::voltage(0), Resolution::Fine);
        assert_close(*v0.last().unwrap(), 3.300);
        let i1 = agg.query(Channel::current(1), Resolution::Fine);
        assert_close(*i1.last().unwrap(), 0.052);
        let i0 = agg.query(Channel::current(0), Resolution::Fine);
        assert_close(*i0.last().unwrap(), 0.050);
        assert_eq!(agg.sample_count(), 1);
    }

    #[test]
    fn reset_clears_everything() {
        let mut agg = aggregator();
        for _ in 0..360 {
            agg.ingest_fine(frame(3300, 50).readings()).unwrap();
        }
        agg.reset();
        assert_eq!(agg.sample_count(), 0);
        assert_eq!(agg.readiness(), Readiness::Empty);
        assert!(!agg.is_fine_ready());
        for resolution in Resolution::ALL {
            for channel in Channel::all(CELL_COUNT) {
                assert!(agg.query(channel, resolution).iter().all(Option::is_none));
            }
        }
    }

    #[test]
    fn query_does_not_mutate() {
        let mut agg = aggregator();
        agg.ingest_fine(frame(3300, 50).readings()).unwrap();
        let first = agg.query(Channel::voltage(3), Resolution::Fine);
        let second = agg.query(Channel::voltage(3), Resolution::Fine);
        assert_eq!(first, second);
        assert_eq!(agg.sample_count(), 1);
    }

    #[test]
    fn medium_rollup_is_mean_of_last_thirty() {
        let mut agg = aggregator();
        for n in 0..30i16 {
            agg.ingest_fine(frame(3000 + n * 10, n).readings()).unwrap();
        }
        // mean of 3000, 3010, .., 3290 is 3145
        for cell in 0..CELL_COUNT {
            let medium = agg.query(Channel::voltage(cell), Resolution::Medium);
            assert_close(*medium.last().unwrap(), 3.145);
            let medium = agg.query(Channel::current(cell), Resolution::Medium);
            assert_close(*medium.last().unwrap(), 0.0145);
        }
        assert_eq!(agg.readiness(), Readiness::Steady);
    }

    #[test]
    fn medium_changes_only_on_multiples_of_thirty() {
        let mut agg = aggregator();
        let mut previous = agg.query(Channel::voltage(0), Resolution::Medium);
        for count in 1..=40u64 {
            agg.ingest_fine(frame(3300, 50).readings()).unwrap();
            let current = agg.query(Channel::voltage(0), Resolution::Medium);
            assert_eq!(current != previous, count == 30, "at sample {count}");
            previous = current;
        }
        assert_eq!(agg.readiness(), Readiness::Steady);
    }

    #[test]
    fn coarse_rollup_fires_at_three_hundred_sixty() {
        let mut agg = aggregator();
        for count in 1..=720u64 {
            let voltage = if count <= 360 { 3000 } else { 3600 };
            agg.ingest_fine(frame(voltage, 0).readings()).unwrap();
            let newest = agg.window(Channel::voltage(0), Resolution::Coarse).unwrap().newest();
            if count < 360 {
                assert_eq!(newest, None, "at sample {count}");
            }
            if count == 360 {
                assert_close(newest, 3.0);
            }
        }
        let coarse = agg.query(Channel::voltage(0), Resolution::Coarse);
        assert_close(coarse[119], 3.0);
        assert_close(coarse[120], 3.6);
        assert_eq!(coarse.iter().flatten().count(), 2);
    }

    #[test]
    fn readiness_moves_from_empty_to_steady() {
        let mut agg = aggregator();
        assert_eq!(agg.readiness(), Readiness::Empty);
        agg.ingest_fine(frame(3300, 50).readings()).unwrap();
        assert_eq!(agg.readiness(), Readiness::Warming);
    }

    #[test]
    fn fine_ready_flag_is_taken_once() {
        let mut agg = aggregator();
        assert!(!agg.take_fine_ready());
        agg.ingest_fine(frame(3300, 50).readings()).unwrap();
        assert!(agg.take_fine_ready());
        assert!(!agg.take_fine_ready());
    }

    #[test]
    fn incomplete_or_unknown_channel_set_is_rejected_whole() {
        let mut agg = aggregator();
        let before = agg.query(Channel::voltage(0), Resolution::Fine);

        let missing: Vec<_> = frame(3300, 50).readings().skip(1).collect();
        assert_eq!(
            agg.ingest_fine(missing),
            Err(TelemetryError::InvalidChannelSet { expected: 16, actual: 15 })
        );

        let mut unknown: Vec<_> = frame(3300, 50).readings().skip(1).collect();
        unknown.push((Channel::voltage(8), 3300));
        assert!(agg.ingest_fine(unknown).is_err());

        let mut repeated: Vec<_> = frame(3300, 50).readings().skip(1).collect();
        repeated.push((Channel::current(0), 50));
        assert!(agg.ingest_fine(repeated).is_err());

        assert_eq!(agg.query(Channel::voltage(0), Resolution::Fine), before);
        assert_eq!(agg.sample_count(), 0);
        assert!(!agg.is_fine_ready());
    }

    #[test]
    fn malformed_payload_is_rejected_whole() {
        let mut agg = aggregator();
        let mut data = encode_pairs(&[(3300, 50); 8]);
        data.extend([0x01, 0x02]);
        assert_eq!(
            agg.ingest_payload(&data),
            Err(TelemetryError::MalformedPayload { len: 34, width: 32 })
        );
        assert_eq!(agg.sample_count(), 0);
        assert!(agg.query(Channel::voltage(0), Resolution::Fine).iter().all(Option::is_none));
    }

    #[test]
    fn payload_with_two_frames_ingests_both() {
        let mut agg = aggregator();
        let mut data = encode_pairs(&[(3300, 50); 8]);
        data.extend(encode_pairs(&[(3400, 60); 8]));
        assert_eq!(agg.ingest_payload(&data), Ok(2));
        let v = agg.query(Channel::voltage(5), Resolution::Fine);
        assert_close(v[119], 3.3);
        assert_close(v[120], 3.4);
    }

    #[test]
    fn history_skips_invalid_pages() {
        let mut agg = aggregator();
        let mut data = encode_pairs(&[(0, 11); 8]);
        data.extend(encode_pairs(&[(3350, 22); 8]));
        assert_eq!(agg.ingest_history_payload(Resolution::Medium, &data), Ok(1));

        let medium = agg.query(Channel::voltage(0), Resolution::Medium);
        assert_eq!(medium.iter().flatten().count(), 1);
        assert_close(medium[120], 3.35);
        let current = agg.query(Channel::current(4), Resolution::Medium);
        assert_close(current[120], 0.022);

        assert_eq!(agg.sample_count(), 0);
        assert!(agg.query(Channel::voltage(0), Resolution::Coarse).iter().all(Option::is_none));
        assert_eq!(agg.readiness(), Readiness::Warming);
    }

    #[test]
    fn history_with_wrong_cell_count_is_rejected() {
        let mut agg = aggregator();
        let pages = vec![HistoryPage { frame: CellFrame::new(vec![(3300, 1); 4]) }];
        assert_eq!(
            agg.ingest_history_batch(Resolution::Coarse, &pages),
            Err(TelemetryError::InvalidChannelSet { expected: 16, actual: 8 })
        );
    }

    #[test]
    fn custom_factors_drive_cadence() {
        let config = TelemetryConfig {
            cells: 1,
            capacity: 4,
            fine_to_medium: 2,
            medium_to_coarse: 2,
            ..TelemetryConfig::default()
        };
        let mut agg = TelemetryAggregator::new(config);
        for raw in [1000, 3000, 5000, 7000] {
            agg.ingest_fine(CellFrame::new(vec![(raw, 0)]).readings()).unwrap();
        }
        let medium = agg.query(Channel::voltage(0), Resolution::Medium);
        assert_eq!(medium, vec![None, None, Some(2.0), Some(6.0)]);
        let coarse = agg.query(Channel::voltage(0), Resolution::Coarse);
        assert_eq!(coarse, vec![None, None, None, Some(4.0)]);
    }
}
