use std::fmt;

/// Number of cells on the balancer board.
pub const CELL_COUNT: usize = 8;

/// The two quantities measured per cell. Each one forms a channel group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Quantity {
    Voltage,
    Current,
}

impl Quantity {
    pub const ALL: [Quantity; 2] = [Quantity::Voltage, Quantity::Current];

    pub fn index(self) -> usize {
        match self {
            Quantity::Voltage => 0,
            Quantity::Current => 1,
        }
    }

    pub fn unit(self) -> &'static str {
        match self {
            Quantity::Voltage => "V",
            Quantity::Current => "A",
        }
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Voltage => write!(f, "voltage"),
            Quantity::Current => write!(f, "current"),
        }
    }
}

/// One measured signal: a quantity of a single cell (0-based).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Channel {
    pub cell: usize,
    pub quantity: Quantity,
}

impl Channel {
    pub fn new(cell: usize, quantity: Quantity) -> Self {
        Self { cell, quantity }
    }

    pub fn voltage(cell: usize) -> Self {
        Self::new(cell, Quantity::Voltage)
    }

    pub fn current(cell: usize) -> Self {
        Self::new(cell, Quantity::Current)
    }

    /// All channels of a board with `cells` cells, in wire order
    /// (voltage then current for each cell).
    pub fn all(cells: usize) -> impl Iterator<Item = Channel> {
        (0..cells).flat_map(|cell| Quantity::ALL.into_iter().map(move |q| Channel::new(cell, q)))
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cell {} {}", self.cell + 1, self.quantity)
    }
}

/// Decimation tier of a rolling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Resolution {
    /// One sample per device notification (about 1 s), shown as 2 minutes.
    #[default]
    Fine,
    /// Rolled up from the fine window, shown as 1 hour.
    Medium,
    /// Rolled up from the medium window, shown as 12 hours.
    Coarse,
}

impl Resolution {
    pub const ALL: [Resolution; 3] = [Resolution::Fine, Resolution::Medium, Resolution::Coarse];

    pub fn index(self) -> usize {
        match self {
            Resolution::Fine => 0,
            Resolution::Medium => 1,
            Resolution::Coarse => 2,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Fine => "2min",
            Resolution::Medium => "1h",
            Resolution::Coarse => "12h",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
