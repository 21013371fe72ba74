//! Decoding of the balancer's notification payloads.
//!
//! Every payload is a flat run of little-endian `i16` words in milli-units.
//! A frame carries one `(voltage, current)` pair per cell, so with 8 cells a
//! frame is 16 words / 32 bytes. The `values` and `deviations` characteristics
//! notify whole frames; the history characteristics notify pages, each page
//! being one frame whose first word doubles as a validity marker.

use crate::channel::Channel;
use crate::error::TelemetryError;

/// One synchronized reading of every cell, still in device units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CellFrame {
    pairs: Vec<(i16, i16)>,
}

impl CellFrame {
    pub fn new(pairs: Vec<(i16, i16)>) -> Self {
        Self { pairs }
    }

    /// Width in bytes of one frame for a board with `cells` cells.
    pub fn width(cells: usize) -> usize {
        cells * 2 * std::mem::size_of::<i16>()
    }

    /// Splits `data` into frames. The length must be a non-zero multiple of
    /// the frame width, otherwise nothing is decoded.
    pub fn decode_all(data: &[u8], cells: usize) -> Result<Vec<CellFrame>, TelemetryError> {
        let width = Self::width(cells);
        if width == 0 || data.is_empty() || data.len() % width != 0 {
            return Err(TelemetryError::MalformedPayload {
                len: data.len(),
                width,
            });
        }

        Ok(data.chunks_exact(width).map(Self::decode_one).collect())
    }

    fn decode_one(chunk: &[u8]) -> CellFrame {
        let words = decode_words(chunk);
        let pairs = words.chunks_exact(2).map(|w| (w[0], w[1])).collect();
        CellFrame { pairs }
    }

    pub fn cells(&self) -> usize {
        self.pairs.len()
    }

    pub fn pair(&self, cell: usize) -> Option<(i16, i16)> {
        self.pairs.get(cell).copied()
    }

    /// The frame as `(channel, raw value)` entries in wire order.
    pub fn readings(&self) -> impl Iterator<Item = (Channel, i16)> + '_ {
        self.pairs
            .iter()
            .enumerate()
            .flat_map(|(cell, &(v, i))| [(Channel::voltage(cell), v), (Channel::current(cell), i)])
    }
}

/// One page of a replayed history buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryPage {
    pub frame: CellFrame,
}

impl HistoryPage {
    /// Slots the device has not filled yet carry a non-positive first word.
    pub fn is_valid(&self) -> bool {
        self.frame.pair(0).is_some_and(|(first, _)| first > 0)
    }

    pub fn decode_all(data: &[u8], cells: usize) -> Result<Vec<HistoryPage>, TelemetryError> {
        Ok(CellFrame::decode_all(data, cells)?
            .into_iter()
            .map(|frame| HistoryPage { frame })
            .collect())
    }
}

fn decode_words(data: &[u8]) -> Vec<i16> {
    data.chunks_exact(2)
        .map(|bytes| i16::from_le_bytes([bytes[0], bytes[1]]))
        .collect()
}
