//! Single-file container holding every segment's datasets and the provenance records.
//!
//! Layout (little-endian):
//!
//! ```text
//! magic "QPLP" | version u32 | flags u32 | metadata_offset u64 |
//! store_id str | reference str | low_read_count u32 | nonref_percent u32 |
//! element_count u32 | segment_count u32 | (name str, length u64, data_offset u64)* |
//! data: per segment, per strand, per element: length * width bytes |
//! metadata: entry_count u32, (entry str)*
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use super::counter::{CounterArray, Element, Strand};
use super::segment::{bytes_per_position, read_str, write_str, ChromosomeSegment};
use crate::config::StoreParameters;
use crate::{PileupError, Result};

const MAGIC: &[u8; 4] = b"QPLP";
const VERSION: u32 = 1;
const FLAGS_OFFSET: u64 = 8;
#[cfg(test)]
const METADATA_POINTER_OFFSET: u64 = 12;
const FLAG_COMMIT_IN_PROGRESS: u32 = 1;
const MAX_NAME_LEN: u64 = 1 << 16;

/// Table entry for one chromosome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SegmentEntry {
    pub name: String,
    pub length: u64,
    pub data_offset: u64,
}

impl SegmentEntry {
    fn strand_bytes(&self) -> u64 {
        self.length * bytes_per_position()
    }

    fn data_len(&self) -> u64 {
        self.strand_bytes() * Strand::ALL.len() as u64
    }

    /// File offset of the first value of one dataset.
    fn dataset_offset(&self, strand: Strand, element: Element) -> u64 {
        let preceding: u64 = Element::ALL[..element.index()]
            .iter()
            .map(|e| e.width() as u64)
            .sum();
        self.data_offset + strand.index() as u64 * self.strand_bytes() + preceding * self.length
    }
}

/// Decoded fixed part of the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub store_id: String,
    pub reference: String,
    pub parameters: StoreParameters,
    pub segments: Vec<SegmentEntry>,
    pub metadata_offset: u64,
}

impl Header {
    pub fn new(
        store_id: String,
        reference: String,
        parameters: StoreParameters,
        chromosomes: &[(String, u64)],
    ) -> Self {
        let mut header = Self {
            store_id,
            reference,
            parameters,
            segments: chromosomes
                .iter()
                .map(|(name, length)| SegmentEntry {
                    name: name.clone(),
                    length: *length,
                    data_offset: 0,
                })
                .collect(),
            metadata_offset: 0,
        };
        let mut offset = header.encoded_len();
        for segment in &mut header.segments {
            segment.data_offset = offset;
            offset += segment.data_len();
        }
        header.metadata_offset = offset;
        header
    }

    fn encoded_len(&self) -> u64 {
        let str_len = |s: &str| 4 + s.len() as u64;
        4 + 4 + 4 + 8
            + str_len(&self.store_id)
            + str_len(&self.reference)
            + 4 * 4
            + self
                .segments
                .iter()
                .map(|s| str_len(&s.name) + 16)
                .sum::<u64>()
    }

    fn write_to<W: Write>(&self, out: &mut W, flags: u32) -> std::io::Result<()> {
        out.write_all(MAGIC)?;
        out.write_u32::<LittleEndian>(VERSION)?;
        out.write_u32::<LittleEndian>(flags)?;
        out.write_u64::<LittleEndian>(self.metadata_offset)?;
        write_str(out, &self.store_id)?;
        write_str(out, &self.reference)?;
        out.write_u32::<LittleEndian>(self.parameters.low_read_count)?;
        out.write_u32::<LittleEndian>(self.parameters.nonref_percent)?;
        out.write_u32::<LittleEndian>(Element::COUNT as u32)?;
        out.write_u32::<LittleEndian>(self.segments.len() as u32)?;
        for segment in &self.segments {
            write_str(out, &segment.name)?;
            out.write_u64::<LittleEndian>(segment.length)?;
            out.write_u64::<LittleEndian>(segment.data_offset)?;
        }
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&SegmentEntry> {
        self.segments.iter().find(|s| s.name == name)
    }
}

/// Open container file.
#[derive(Debug)]
pub(crate) struct Container {
    path: PathBuf,
    file: File,
    header: Arc<Header>,
    writable: bool,
}

impl Container {
    /// Write a fresh container with zero-filled datasets and the given records.
    pub fn create(path: &Path, header: Header, records: &[String]) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)
            .map_err(|e| PileupError::io(path, e))?;
        {
            let mut out = BufWriter::new(&file);
            header
                .write_to(&mut out, 0)
                .and_then(|_| out.flush())
                .map_err(|e| PileupError::io(path, e))?;
        }
        // Sparse zero fill; datasets are never written at bootstrap.
        file.set_len(header.metadata_offset)
            .map_err(|e| PileupError::io(path, e))?;
        let mut container = Self {
            path: path.to_path_buf(),
            file,
            header: Arc::new(header),
            writable: true,
        };
        container.write_metadata(records)?;
        Ok(container)
    }

    /// Open and validate an existing container.
    pub fn open(path: &Path, writable: bool) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|e| PileupError::io(path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| PileupError::io(path, e))?
            .len();
        let (header, flags) = {
            let mut input = BufReader::new(&file);
            read_header(&mut input, file_len).map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof
                    || e.kind() == std::io::ErrorKind::InvalidData
                {
                    PileupError::corrupt(path, e.to_string())
                } else {
                    PileupError::io(path, e)
                }
            })?
        };
        if flags & FLAG_COMMIT_IN_PROGRESS != 0 {
            return Err(PileupError::corrupt(
                path,
                "interrupted commit, restore from backup",
            ));
        }
        if file_len < header.metadata_offset + 4 {
            return Err(PileupError::corrupt(
                path,
                format!(
                    "file is {} bytes but metadata starts at {}",
                    file_len, header.metadata_offset
                ),
            ));
        }
        Ok(Self {
            path: path.to_path_buf(),
            file,
            header: Arc::new(header),
            writable,
        })
    }

    /// Second read-only handle sharing the validated header.
    pub fn reopen_read(&self) -> Result<Self> {
        let file = File::open(&self.path).map_err(|e| PileupError::io(&self.path, e))?;
        Ok(Self {
            path: self.path.clone(),
            file,
            header: Arc::clone(&self.header),
            writable: false,
        })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn entry(&self, name: &str) -> Result<&SegmentEntry> {
        self.header
            .find(name)
            .ok_or_else(|| PileupError::UnknownChromosome(name.to_string()))
    }

    /// Load `[start, end]` of every dataset of one chromosome.
    pub fn read_span(&mut self, name: &str, start: u64, end: u64) -> Result<ChromosomeSegment> {
        let entry = self.entry(name)?.clone();
        if start == 0 || end < start || end > entry.length {
            return Err(PileupError::InvalidRegion {
                region: format!("{}:{}-{}", name, start, end),
                reason: format!("must lie within 1-{}", entry.length),
            });
        }
        let span = (end - start + 1) as usize;
        let mut counters = Vec::with_capacity(Strand::ALL.len() * Element::COUNT);
        for strand in Strand::ALL {
            for &element in Element::ALL {
                let width = element.width() as u64;
                let offset = entry.dataset_offset(strand, element) + (start - 1) * width;
                let mut bytes = vec![0u8; span * element.width()];
                self.file
                    .seek(SeekFrom::Start(offset))
                    .and_then(|_| self.file.read_exact(&mut bytes))
                    .map_err(|e| PileupError::io(&self.path, e))?;
                let counter = CounterArray::from_le_bytes(element, &bytes).ok_or_else(|| {
                    PileupError::corrupt(&self.path, format!("short dataset {} for {}", element, name))
                })?;
                counters.push(counter);
            }
        }
        Ok(ChromosomeSegment::from_counters(
            name.to_string(),
            entry.length,
            start,
            end,
            counters,
        ))
    }

    /// Overwrite the datasets covered by `segment`.
    pub fn write_span(&mut self, segment: &ChromosomeSegment) -> Result<()> {
        self.ensure_writable()?;
        let entry = self.entry(segment.name())?.clone();
        if entry.length != segment.length() || segment.end() > entry.length {
            return Err(PileupError::incompatible(
                &self.path,
                format!(
                    "segment {} has length {}, store declares {}",
                    segment.name(),
                    segment.length(),
                    entry.length
                ),
            ));
        }
        for (slot, counter) in segment.counters().iter().enumerate() {
            let strand = Strand::ALL[slot / Element::COUNT];
            let element = counter.element();
            let offset = entry.dataset_offset(strand, element) + (segment.start() - 1) * element.width() as u64;
            self.file
                .seek(SeekFrom::Start(offset))
                .and_then(|_| self.file.write_all(&counter.to_le_bytes()))
                .map_err(|e| PileupError::io(&self.path, e))?;
        }
        Ok(())
    }

    /// Provenance records in order.
    pub fn read_metadata(&mut self) -> Result<Vec<String>> {
        let path = self.path.clone();
        let file_len = self
            .file
            .metadata()
            .map_err(|e| PileupError::io(&path, e))?
            .len();
        self.file
            .seek(SeekFrom::Start(self.header.metadata_offset))
            .map_err(|e| PileupError::io(&path, e))?;
        let mut input = BufReader::new(&self.file);
        let count = input
            .read_u32::<LittleEndian>()
            .map_err(|e| PileupError::corrupt(&path, format!("metadata count: {}", e)))?;
        let mut records = Vec::with_capacity((count as usize).min(1 << 16));
        for i in 0..count {
            let record = read_str(&mut input, file_len)
                .map_err(|e| PileupError::corrupt(&path, format!("metadata record {}: {}", i, e)))?;
            records.push(record);
        }
        Ok(records)
    }

    /// Replace the provenance records and truncate anything after them.
    pub fn write_metadata(&mut self, records: &[String]) -> Result<()> {
        self.ensure_writable()?;
        let path = self.path.clone();
        let offset = self.header.metadata_offset;
        let mut buffer = Vec::new();
        buffer
            .write_u32::<LittleEndian>(records.len() as u32)
            .map_err(|e| PileupError::io(&path, e))?;
        for record in records {
            write_str(&mut buffer, record).map_err(|e| PileupError::io(&path, e))?;
        }
        self.file
            .seek(SeekFrom::Start(offset))
            .and_then(|_| self.file.write_all(&buffer))
            .and_then(|_| self.file.set_len(offset + buffer.len() as u64))
            .map_err(|e| PileupError::io(&path, e))
    }

    /// Set or clear the commit-in-progress flag and sync it to disk.
    pub fn set_commit_flag(&mut self, in_progress: bool) -> Result<()> {
        self.ensure_writable()?;
        let flags = if in_progress { FLAG_COMMIT_IN_PROGRESS } else { 0 };
        let path = self.path.clone();
        self.file
            .seek(SeekFrom::Start(FLAGS_OFFSET))
            .and_then(|_| self.file.write_u32::<LittleEndian>(flags))
            .and_then(|_| self.file.sync_data())
            .map_err(|e| PileupError::io(&path, e))
    }

    pub fn sync(&self) -> Result<()> {
        if !self.writable {
            return Ok(());
        }
        self.file
            .sync_all()
            .map_err(|e| PileupError::io(&self.path, e))
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(PileupError::InvalidConfiguration(format!(
                "store {} was opened read-only",
                self.path.display()
            )))
        }
    }
}

fn read_header<R: Read + Seek>(input: &mut R, file_len: u64) -> std::io::Result<(Header, u32)> {
    use super::segment::invalid_data;

    let mut magic = [0u8; 4];
    input.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(invalid_data("not a pileup store (bad magic)".to_string()));
    }
    let version = input.read_u32::<LittleEndian>()?;
    if version != VERSION {
        return Err(invalid_data(format!("unsupported container version {}", version)));
    }
    let flags = input.read_u32::<LittleEndian>()?;
    let metadata_offset = input.read_u64::<LittleEndian>()?;
    let store_id = read_str(input, MAX_NAME_LEN)?;
    let reference = read_str(input, MAX_NAME_LEN)?;
    let parameters = StoreParameters {
        low_read_count: input.read_u32::<LittleEndian>()?,
        nonref_percent: input.read_u32::<LittleEndian>()?,
    };
    let element_count = input.read_u32::<LittleEndian>()?;
    if element_count as usize != Element::COUNT {
        return Err(invalid_data(format!(
            "store tracks {} elements, expected {}",
            element_count,
            Element::COUNT
        )));
    }
    let segment_count = input.read_u32::<LittleEndian>()?;
    if u64::from(segment_count) * 20 > file_len {
        return Err(invalid_data(format!("implausible segment count {}", segment_count)));
    }
    let mut segments: Vec<SegmentEntry> = Vec::with_capacity(segment_count as usize);
    for _ in 0..segment_count {
        let name = read_str(input, MAX_NAME_LEN)?;
        let length = input.read_u64::<LittleEndian>()?;
        let data_offset = input.read_u64::<LittleEndian>()?;
        if length == 0 {
            return Err(invalid_data(format!("chromosome {} has zero length", name)));
        }
        if segments.iter().any(|s| s.name == name) {
            return Err(invalid_data(format!("chromosome {} appears twice", name)));
        }
        segments.push(SegmentEntry {
            name,
            length,
            data_offset,
        });
    }
    if segments.is_empty() {
        return Err(invalid_data("store has no chromosomes".to_string()));
    }
    let mut expected = input.stream_position()?;
    for segment in &segments {
        if segment.data_offset != expected {
            return Err(invalid_data(format!(
                "data for {} starts at {}, expected {}",
                segment.name, segment.data_offset, expected
            )));
        }
        expected = segment
            .data_offset
            .checked_add(segment.data_len())
            .ok_or_else(|| invalid_data(format!("data for {} overflows", segment.name)))?;
    }
    if expected != metadata_offset {
        return Err(invalid_data(format!(
            "data ends at {} but metadata starts at {}",
            expected, metadata_offset
        )));
    }
    Ok((
        Header {
            store_id,
            reference,
            parameters,
            segments,
            metadata_offset,
        },
        flags,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom, Write};
    use tempfile::NamedTempFile;

    fn chromosomes() -> Vec<(String, u64)> {
        vec![("chr1".to_string(), 100), ("chr2".to_string(), 50)]
    }

    fn create(path: &Path) -> Container {
        let header = Header::new(
            "store-1".into(),
            "ref.fa".into(),
            StoreParameters::default(),
            &chromosomes(),
        );
        Container::create(path, header, &["MODE:bootstrap".to_string()]).unwrap()
    }

    #[test]
    fn created_container_reopens_with_same_header() {
        let file = NamedTempFile::new().unwrap();
        let header = create(file.path()).header().clone();
        let mut reopened = Container::open(file.path(), false).unwrap();
        assert_eq!(reopened.header(), &header);
        assert_eq!(reopened.read_metadata().unwrap(), vec!["MODE:bootstrap".to_string()]);
        let expected_len = header.metadata_offset;
        assert_eq!(header.segments[1].data_offset, header.segments[0].data_offset + 100 * 132 * 2);
        assert!(file.path().metadata().unwrap().len() > expected_len);
    }

    #[test]
    fn span_writes_land_in_their_dataset() {
        let file = NamedTempFile::new().unwrap();
        let mut container = create(file.path());
        let mut block = container.read_span("chr2", 10, 20).unwrap();
        block.add(Strand::Reverse, Element::QualT, 15, 300).unwrap();
        container.write_span(&block).unwrap();

        let whole = container.read_span("chr2", 1, 50).unwrap();
        assert_eq!(whole.get(Strand::Reverse, Element::QualT, 15), Some(300));
        assert_eq!(whole.get(Strand::Forward, Element::QualT, 15), Some(0));
        let chr1 = container.read_span("chr1", 1, 100).unwrap();
        assert!(chr1.is_zero());
    }

    #[test]
    fn metadata_rewrite_truncates_old_records() {
        let file = NamedTempFile::new().unwrap();
        let mut container = create(file.path());
        container
            .write_metadata(&["a".to_string(), "b".to_string()])
            .unwrap();
        container.write_metadata(&["c".to_string()]).unwrap();
        assert_eq!(container.read_metadata().unwrap(), vec!["c".to_string()]);
    }

    #[test]
    fn bad_magic_is_corrupt() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"NOPE0000000000000000").unwrap();
        let err = Container::open(file.path(), false).unwrap_err();
        assert!(matches!(err, PileupError::CorruptStore { .. }), "{err}");
    }

    #[test]
    fn interrupted_commit_is_corrupt() {
        let file = NamedTempFile::new().unwrap();
        let mut container = create(file.path());
        container.set_commit_flag(true).unwrap();
        drop(container);
        let err = Container::open(file.path(), false).unwrap_err();
        assert!(err.to_string().contains("interrupted commit"));
    }

    #[test]
    fn misplaced_metadata_pointer_is_corrupt() {
        let file = NamedTempFile::new().unwrap();
        drop(create(file.path()));
        let mut raw = OpenOptions::new().write(true).open(file.path()).unwrap();
        raw.seek(SeekFrom::Start(METADATA_POINTER_OFFSET)).unwrap();
        raw.write_u64::<LittleEndian>(7).unwrap();
        drop(raw);
        let err = Container::open(file.path(), false).unwrap_err();
        assert!(matches!(err, PileupError::CorruptStore { .. }), "{err}");
    }
}
