use core::fmt;

// DHT11 data frame: 16 bit humidity, 16 bit temperature, 8 bit checksum.
pub const STANDARD_FRAME_BITS: usize = 40;

// Capture buffer holds twice the frame so a redundant leading/trailing symbol fits.
pub const MAX_SYMBOLS: usize = STANDARD_FRAME_BITS * 2;

// Response pulse + 40 data bits + terminator.
pub const MIN_FRAME_SYMBOLS: usize = STANDARD_FRAME_BITS + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Low,
    High,
}

impl Level {
    fn from_bit(bit: u32) -> Self {
        if bit & 1 == 0 {
            Self::Low
        } else {
            Self::High
        }
    }

    fn bit(self) -> u32 {
        match self {
            Self::Low => 0,
            Self::High => 1,
        }
    }
}

/// One half of a pulse symbol: a line level held for `duration` capture ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Phase {
    pub level: Level,
    pub duration: u16,
}

impl Phase {
    pub const fn new(level: Level, duration: u16) -> Self {
        Self { level, duration }
    }
}

/// A captured (level, duration) pair as recorded by the capture peripheral.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseSymbol {
    pub first: Phase,
    pub second: Phase,
}

impl PulseSymbol {
    // RMT durations are 15 bit wide.
    const DURATION_MASK: u32 = 0x7FFF;

    pub const fn new(first: Phase, second: Phase) -> Self {
        Self { first, second }
    }

    /// Unpacks an RMT symbol word: duration0:15, level0:1, duration1:15, level1:1 (LSB first).
    pub fn from_word(word: u32) -> Self {
        Self {
            first: Phase::new(
                Level::from_bit(word >> 15),
                (word & Self::DURATION_MASK) as u16,
            ),
            second: Phase::new(
                Level::from_bit(word >> 31),
                ((word >> 16) & Self::DURATION_MASK) as u16,
            ),
        }
    }

    pub fn to_word(self) -> u32 {
        (u32::from(self.first.duration) & Self::DURATION_MASK)
            | self.first.level.bit() << 15
            | (u32::from(self.second.duration) & Self::DURATION_MASK) << 16
            | self.second.level.bit() << 31
    }

    /// Duration of the phase that is physically the high pulse.
    ///
    /// A bit cell is normally captured as (low, high). When the capture
    /// filter swallows the low part the symbol starts with the high pulse
    /// instead, so the first phase carries the bit value.
    pub fn high_duration(&self) -> u16 {
        match self.first.level {
            Level::High => self.first.duration,
            Level::Low => self.second.duration,
        }
    }
}

/// The symbols captured during one acquisition attempt.
///
/// Kept as raw RMT words with a fixed capacity, so copying one out of the
/// receive buffer never allocates.
#[derive(Clone, Copy)]
pub struct RawFrame {
    words: [u32; MAX_SYMBOLS],
    len: usize,
}

impl RawFrame {
    pub const fn new() -> Self {
        Self {
            words: [0; MAX_SYMBOLS],
            len: 0,
        }
    }

    /// Copies at most `MAX_SYMBOLS` symbols; anything beyond is dropped.
    pub fn from_symbols(symbols: &[PulseSymbol]) -> Self {
        let mut frame = Self::new();
        for symbol in symbols.iter().take(MAX_SYMBOLS) {
            frame.push(*symbol);
        }
        frame
    }

    /// Builds a frame from raw RMT symbol words. Bounded time, no allocation.
    pub fn from_words(words: &[u32]) -> Self {
        let mut frame = Self::new();
        let len = words.len().min(MAX_SYMBOLS);
        frame.words[..len].copy_from_slice(&words[..len]);
        frame.len = len;
        frame
    }

    pub fn push(&mut self, symbol: PulseSymbol) -> bool {
        if self.len == MAX_SYMBOLS {
            return false;
        }
        self.words[self.len] = symbol.to_word();
        self.len += 1;
        true
    }

    pub fn get(&self, index: usize) -> Option<PulseSymbol> {
        self.words().get(index).copied().map(PulseSymbol::from_word)
    }

    pub fn symbols(&self) -> impl ExactSizeIterator<Item = PulseSymbol> + '_ {
        self.words().iter().copied().map(PulseSymbol::from_word)
    }

    pub fn words(&self) -> &[u32] {
        &self.words[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Default for RawFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for RawFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.symbols()).finish()
    }
}
