//! Chromosome segments: the counter arrays of one chromosome, or of a block of it.

use std::io::{Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::counter::{CounterArray, CounterFault, Element, Strand};
use crate::{PileupError, Result};

/// Bytes per position per strand across all elements.
pub fn bytes_per_position() -> u64 {
    Element::ALL.iter().map(|e| e.width() as u64).sum()
}

/// Full set of counter arrays for `[start, end]` of one chromosome.
///
/// A segment loaded with [`PileupStore::segment`](super::PileupStore::segment)
/// spans the whole chromosome; pipeline workers operate on block spans.
/// Positions are 1-based reference coordinates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChromosomeSegment {
    name: String,
    length: u64,
    start: u64,
    end: u64,
    counters: Vec<CounterArray>,
}

impl ChromosomeSegment {
    /// Zero-filled segment covering the whole chromosome.
    pub fn zeroed(name: impl Into<String>, length: u64) -> Self {
        Self::zeroed_span(name, length, 1, length)
    }

    /// Zero-filled segment covering `[start, end]`, clamped to the chromosome.
    pub fn zeroed_span(name: impl Into<String>, length: u64, start: u64, end: u64) -> Self {
        let start = start.max(1);
        let end = end.min(length);
        let span = if end >= start { (end - start + 1) as usize } else { 0 };
        let counters = Strand::ALL
            .iter()
            .flat_map(|_| Element::ALL.iter().map(move |&e| CounterArray::zeroed(e, span)))
            .collect();
        Self {
            name: name.into(),
            length,
            start,
            end,
            counters,
        }
    }

    pub(crate) fn from_counters(
        name: String,
        length: u64,
        start: u64,
        end: u64,
        counters: Vec<CounterArray>,
    ) -> Self {
        debug_assert_eq!(counters.len(), Strand::ALL.len() * Element::COUNT);
        Self {
            name,
            length,
            start,
            end,
            counters,
        }
    }

    /// Chromosome name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared chromosome length.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// First position held (1-based).
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Last position held (inclusive).
    pub fn end(&self) -> u64 {
        self.end
    }

    /// Number of positions held.
    pub fn span_len(&self) -> usize {
        if self.end >= self.start {
            (self.end - self.start + 1) as usize
        } else {
            0
        }
    }

    /// Whether `position` lies inside the held span.
    pub fn contains(&self, position: u64) -> bool {
        position >= self.start && position <= self.end
    }

    fn slot(strand: Strand, element: Element) -> usize {
        strand.index() * Element::COUNT + element.index()
    }

    /// Counter array for a strand and element.
    pub fn counter(&self, strand: Strand, element: Element) -> &CounterArray {
        &self.counters[Self::slot(strand, element)]
    }

    /// All counter arrays in persisted order (strand-major).
    pub fn counters(&self) -> &[CounterArray] {
        &self.counters
    }

    /// Counter value at a 1-based position, or `None` outside the span.
    pub fn get(&self, strand: Strand, element: Element, position: u64) -> Option<u64> {
        if !self.contains(position) {
            return None;
        }
        self.counter(strand, element)
            .get((position - self.start) as usize)
    }

    /// Add to the counter at `position`; positions outside the span are dropped.
    pub fn add(&mut self, strand: Strand, element: Element, position: u64, amount: u64) -> Result<()> {
        if !self.contains(position) {
            return Ok(());
        }
        let offset = (position - self.start) as usize;
        self.counters[Self::slot(strand, element)]
            .add(offset, amount)
            .map_err(|fault| self.range_error(strand, element, position, fault))
    }

    /// Add one to the counter at `position`.
    pub fn increment(&mut self, strand: Strand, element: Element, position: u64) -> Result<()> {
        self.add(strand, element, position, 1)
    }

    /// Elementwise `self += delta` (or `-=` when `subtract`) over the same span.
    pub fn apply(&mut self, delta: &ChromosomeSegment, subtract: bool) -> Result<()> {
        if delta.name != self.name || delta.start != self.start || delta.end != self.end {
            return Err(PileupError::InvalidConfiguration(format!(
                "cannot combine {}:{}-{} with {}:{}-{}",
                self.name, self.start, self.end, delta.name, delta.start, delta.end
            )));
        }
        for (slot, other) in delta.counters.iter().enumerate() {
            let strand = Strand::ALL[slot / Element::COUNT];
            let element = other.element();
            if let Err((offset, fault)) = self.counters[slot].combine(other, subtract) {
                return Err(self.range_error(strand, element, self.start + offset as u64, fault));
            }
        }
        Ok(())
    }

    /// Whether every counter in the span is zero.
    pub fn is_zero(&self) -> bool {
        self.counters.iter().all(CounterArray::is_zero)
    }

    fn range_error(&self, strand: Strand, element: Element, position: u64, fault: CounterFault) -> PileupError {
        PileupError::CounterRange {
            chromosome: self.name.clone(),
            position,
            strand: strand.suffix(),
            element: element.name(),
            fault: match fault {
                CounterFault::Overflow => "overflow",
                CounterFault::Underflow => "underflow",
            },
        }
    }

    /// Serialize the span (bounds, then every dataset) to a stream.
    pub(crate) fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        write_str(out, &self.name)?;
        out.write_u64::<LittleEndian>(self.length)?;
        out.write_u64::<LittleEndian>(self.start)?;
        out.write_u64::<LittleEndian>(self.end)?;
        for counter in &self.counters {
            out.write_all(&counter.to_le_bytes())?;
        }
        Ok(())
    }

    /// Inverse of [`ChromosomeSegment::write_to`].
    pub(crate) fn read_from<R: Read>(input: &mut R) -> std::io::Result<Self> {
        let name = read_str(input, u32::MAX as u64)?;
        let length = input.read_u64::<LittleEndian>()?;
        let start = input.read_u64::<LittleEndian>()?;
        let end = input.read_u64::<LittleEndian>()?;
        if start == 0 || end < start || end > length {
            return Err(invalid_data(format!("bad span {}:{}-{}", name, start, end)));
        }
        let span = (end - start + 1) as usize;
        let mut counters = Vec::with_capacity(Strand::ALL.len() * Element::COUNT);
        for _ in Strand::ALL {
            for &element in Element::ALL {
                let mut bytes = vec![0u8; span * element.width()];
                input.read_exact(&mut bytes)?;
                let counter = CounterArray::from_le_bytes(element, &bytes)
                    .ok_or_else(|| invalid_data(format!("bad dataset for {}", element)))?;
                counters.push(counter);
            }
        }
        Ok(Self::from_counters(name, length, start, end, counters))
    }
}

pub(crate) fn invalid_data(message: String) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, message)
}

/// Length-prefixed UTF-8 string.
pub(crate) fn write_str<W: Write>(out: &mut W, value: &str) -> std::io::Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| invalid_data("string too long".to_string()))?;
    out.write_u32::<LittleEndian>(len)?;
    out.write_all(value.as_bytes())
}

/// Read a string written by [`write_str`], refusing lengths above `limit`.
pub(crate) fn read_str<R: Read>(input: &mut R, limit: u64) -> std::io::Result<String> {
    let len = input.read_u32::<LittleEndian>()?;
    if u64::from(len) > limit {
        return Err(invalid_data(format!("string length {} exceeds {}", len, limit)));
    }
    let mut bytes = vec![0u8; len as usize];
    input.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| invalid_data(e.to_string()))
}
