//! Counter arrays: one per (strand, element) pair of a chromosome span.

use std::fmt;
use std::str::FromStr;

use byteorder::{ByteOrder, LittleEndian};

/// Read orientation a counter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Strand {
    /// Reads aligned to the forward strand.
    Forward,
    /// Reads aligned to the reverse strand.
    Reverse,
}

impl Strand {
    /// Both strands in persisted order.
    pub const ALL: [Strand; 2] = [Strand::Forward, Strand::Reverse];

    /// Strand of a read given its reverse flag.
    pub fn of(is_reverse: bool) -> Self {
        if is_reverse {
            Strand::Reverse
        } else {
            Strand::Forward
        }
    }

    /// Position of the strand within [`Strand::ALL`].
    pub fn index(self) -> usize {
        match self {
            Strand::Forward => 0,
            Strand::Reverse => 1,
        }
    }

    /// Column suffix used by the view export.
    pub fn suffix(self) -> &'static str {
        match self {
            Strand::Forward => "for",
            Strand::Reverse => "rev",
        }
    }
}

macro_rules! elements {
    ($( $variant:ident => ($name:literal, $width:literal) ),+ $(,)?) => {
        /// Per-position quantity tracked for every strand of every chromosome.
        ///
        /// The declaration order is the persisted dataset order and must not change
        /// without bumping the container version.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
        #[cfg_attr(feature = "serde", derive(serde::Serialize))]
        pub enum Element {
            $(
                #[doc = concat!("`", $name, "` counter.")]
                $variant,
            )+
        }

        impl Element {
            /// Every element in persisted order.
            pub const ALL: &'static [Element] = &[$(Element::$variant),+];

            /// Name used in view headers and element selections.
            pub fn name(self) -> &'static str {
                match self {
                    $(Element::$variant => $name,)+
                }
            }

            /// Bytes per value on disk.
            pub fn width(self) -> usize {
                match self {
                    $(Element::$variant => $width,)+
                }
            }
        }
    };
}

elements! {
    BaseA => ("baseA", 4),
    BaseC => ("baseC", 4),
    BaseG => ("baseG", 4),
    BaseT => ("baseT", 4),
    BaseN => ("baseN", 4),
    QualA => ("qualA", 8),
    QualC => ("qualC", 8),
    QualG => ("qualG", 8),
    QualT => ("qualT", 8),
    QualN => ("qualN", 8),
    MapQual => ("mapQual", 8),
    StartAll => ("startAll", 4),
    StopAll => ("stopAll", 4),
    MateUnmapped => ("mateUnmapped", 4),
    CigarI => ("cigarI", 4),
    CigarD => ("cigarD", 4),
    CigarDStart => ("cigarDStart", 4),
    CigarS => ("cigarS", 4),
    CigarSStart => ("cigarSStart", 4),
    CigarH => ("cigarH", 4),
    CigarHStart => ("cigarHStart", 4),
    CigarN => ("cigarN", 4),
    CigarNStart => ("cigarNStart", 4),
    ReferenceNo => ("referenceNo", 4),
    NonreferenceNo => ("nonreferenceNo", 4),
    HighNonreference => ("highNonreference", 4),
    LowRead => ("lowRead", 4),
}

impl Element {
    /// Number of tracked elements.
    pub const COUNT: usize = Element::ALL.len();

    /// Position of the element within [`Element::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether values are 64-bit sums rather than 32-bit counts.
    pub fn is_wide(self) -> bool {
        self.width() == 8
    }

    /// Base-count element for a called base; anything outside ACGT is `N`.
    pub fn base(base: u8) -> Self {
        match base {
            b'A' | b'a' => Element::BaseA,
            b'C' | b'c' => Element::BaseC,
            b'G' | b'g' => Element::BaseG,
            b'T' | b't' => Element::BaseT,
            _ => Element::BaseN,
        }
    }

    /// Quality-sum element paired with a base-count element.
    pub fn quality_of(base_element: Element) -> Self {
        match base_element {
            Element::BaseA => Element::QualA,
            Element::BaseC => Element::QualC,
            Element::BaseG => Element::QualG,
            Element::BaseT => Element::QualT,
            _ => Element::QualN,
        }
    }

    /// The five base-count elements.
    pub fn bases() -> [Element; 5] {
        [
            Element::BaseA,
            Element::BaseC,
            Element::BaseG,
            Element::BaseT,
            Element::BaseN,
        ]
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Element {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Element::ALL
            .iter()
            .copied()
            .find(|element| element.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown element '{}'", s))
    }
}

/// Arithmetic failure while applying a value to a counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterFault {
    /// Result does not fit the element's width.
    Overflow,
    /// Result would drop below zero.
    Underflow,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Values {
    Narrow(Vec<u32>),
    Wide(Vec<u64>),
}

/// Fixed-length array of unsigned counters for one element.
///
/// Indices are 0-based offsets into the span the array was loaded for;
/// [`ChromosomeSegment`](super::ChromosomeSegment) translates 1-based reference
/// coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterArray {
    element: Element,
    values: Values,
}

impl CounterArray {
    /// Zero-filled array of `len` counters.
    pub fn zeroed(element: Element, len: usize) -> Self {
        let values = if element.is_wide() {
            Values::Wide(vec![0; len])
        } else {
            Values::Narrow(vec![0; len])
        };
        Self { element, values }
    }

    /// Element tracked by this array.
    pub fn element(&self) -> Element {
        self.element
    }

    /// Number of counters.
    pub fn len(&self) -> usize {
        match &self.values {
            Values::Narrow(v) => v.len(),
            Values::Wide(v) => v.len(),
        }
    }

    /// Whether the array holds no counters.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Counter value at `offset`, or `None` past the end.
    pub fn get(&self, offset: usize) -> Option<u64> {
        match &self.values {
            Values::Narrow(v) => v.get(offset).map(|&x| u64::from(x)),
            Values::Wide(v) => v.get(offset).copied(),
        }
    }

    /// Iterate counters in order.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.len()).filter_map(move |offset| self.get(offset))
    }

    /// Whether every counter is zero.
    pub fn is_zero(&self) -> bool {
        match &self.values {
            Values::Narrow(v) => v.iter().all(|&x| x == 0),
            Values::Wide(v) => v.iter().all(|&x| x == 0),
        }
    }

    /// Add `amount` at `offset`. Offsets past the end are ignored.
    pub fn add(&mut self, offset: usize, amount: u64) -> Result<(), CounterFault> {
        match &mut self.values {
            Values::Narrow(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    let amount = u32::try_from(amount).map_err(|_| CounterFault::Overflow)?;
                    *slot = slot.checked_add(amount).ok_or(CounterFault::Overflow)?;
                }
            }
            Values::Wide(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = slot.checked_add(amount).ok_or(CounterFault::Overflow)?;
                }
            }
        }
        Ok(())
    }

    /// Subtract `amount` at `offset`. Offsets past the end are ignored.
    pub fn subtract(&mut self, offset: usize, amount: u64) -> Result<(), CounterFault> {
        match &mut self.values {
            Values::Narrow(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    let amount = u32::try_from(amount).map_err(|_| CounterFault::Underflow)?;
                    *slot = slot.checked_sub(amount).ok_or(CounterFault::Underflow)?;
                }
            }
            Values::Wide(v) => {
                if let Some(slot) = v.get_mut(offset) {
                    *slot = slot.checked_sub(amount).ok_or(CounterFault::Underflow)?;
                }
            }
        }
        Ok(())
    }

    /// Elementwise `self += other` (or `-=` when `subtract`).
    ///
    /// On failure returns the offending offset; counters before it have already
    /// been updated.
    pub fn combine(&mut self, other: &CounterArray, subtract: bool) -> Result<(), (usize, CounterFault)> {
        debug_assert_eq!(self.element, other.element);
        debug_assert_eq!(self.len(), other.len());
        for (offset, amount) in other.iter().enumerate() {
            if amount == 0 {
                continue;
            }
            let applied = if subtract {
                self.subtract(offset, amount)
            } else {
                self.add(offset, amount)
            };
            applied.map_err(|fault| (offset, fault))?;
        }
        Ok(())
    }

    /// Little-endian encoding, `len * width` bytes.
    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.len() * self.element.width()];
        match &self.values {
            Values::Narrow(v) => LittleEndian::write_u32_into(v, &mut bytes),
            Values::Wide(v) => LittleEndian::write_u64_into(v, &mut bytes),
        }
        bytes
    }

    /// Decode from little-endian bytes produced by [`CounterArray::to_le_bytes`].
    pub fn from_le_bytes(element: Element, bytes: &[u8]) -> Option<Self> {
        let width = element.width();
        if bytes.len() % width != 0 {
            return None;
        }
        let values = if element.is_wide() {
            let mut v = vec![0u64; bytes.len() / width];
            LittleEndian::read_u64_into(bytes, &mut v);
            Values::Wide(v)
        } else {
            let mut v = vec![0u32; bytes.len() / width];
            LittleEndian::read_u32_into(bytes, &mut v);
            Values::Narrow(v)
        };
        Some(Self { element, values })
    }
}
