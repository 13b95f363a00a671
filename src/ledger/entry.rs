use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::StoreParameters;
use crate::{PileupError, Result};

/// Kind of operation a provenance entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum Operation {
    /// Store creation.
    Bootstrap,
    /// Contribution of one alignment source.
    Add,
    /// Reversal of an earlier `Add`.
    Remove,
    /// Counters of another store folded in.
    Merge,
}

impl Operation {
    /// Record keyword.
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Bootstrap => "bootstrap",
            Operation::Add => "add",
            Operation::Remove => "remove",
            Operation::Merge => "merge",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "bootstrap" => Some(Operation::Bootstrap),
            "add" => Some(Operation::Add),
            "remove" => Some(Operation::Remove),
            "merge" => Some(Operation::Merge),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether an `add` is still counted in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub enum EntryStatus {
    /// Counters include this contribution.
    Active,
    /// A later `remove` took the contribution back out.
    Reversed,
}

/// Reject a value that would split a provenance record (fields are `,`-separated).
pub(crate) fn check_field(what: &str, value: &str) -> Result<()> {
    if value.contains(',') {
        return Err(PileupError::InvalidConfiguration(format!(
            "{} may not contain ',': {}",
            what, value
        )));
    }
    Ok(())
}

/// Identity of an alignment source: where it lives and what it contains.
///
/// Two identities denote the same contribution when their signatures match,
/// regardless of path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SourceIdentity {
    path: PathBuf,
    signature: String,
}

impl SourceIdentity {
    /// Identity with an explicit signature.
    pub fn new(path: impl Into<PathBuf>, signature: impl Into<String>) -> Result<Self> {
        let path = path.into();
        let signature = signature.into();
        check_field("source path", &path.to_string_lossy())?;
        check_field("source signature", &signature)?;
        Ok(Self { path, signature })
    }

    /// Identity of a file: absolute path plus blake3 digest of its content.
    pub fn from_file(path: &Path) -> Result<Self> {
        let absolute = path
            .canonicalize()
            .map_err(|e| PileupError::io(path, e))?;
        let mut file = std::fs::File::open(&absolute).map_err(|e| PileupError::io(&absolute, e))?;
        let mut hasher = blake3::Hasher::new();
        std::io::copy(&mut file, &mut hasher).map_err(|e| PileupError::io(&absolute, e))?;
        let signature = hasher.finalize().to_hex().to_string();
        Self::new(absolute, signature)
    }

    /// Identity of a file carrying a declared UUID instead of a content digest.
    pub fn with_uuid(path: &Path, uuid: &str) -> Result<Self> {
        let absolute = path
            .canonicalize()
            .map_err(|e| PileupError::io(path, e))?;
        Self::new(absolute, format!("uuid:{}", uuid))
    }

    /// Source path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Content signature (`uuid:<value>` for declared identities).
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Whether the signature was declared rather than computed.
    pub fn is_declared(&self) -> bool {
        self.signature.starts_with("uuid:")
    }

    pub(crate) fn path_text(&self) -> String {
        self.path.to_string_lossy().into_owned()
    }
}

/// One record of the provenance log.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ProvenanceEntry {
    /// Operation recorded.
    pub operation: Operation,
    /// UTC wall-clock time the operation finished.
    pub date: String,
    /// Wall time the operation took, whole seconds.
    pub runtime_secs: u64,
    /// Source path (alignment file, source store or reference).
    pub file: String,
    /// Reads counted for add/remove; carried entries for merge.
    pub records: u64,
    /// Source content signature for add/remove.
    pub signature: Option<String>,
    /// Source store identifier for merge.
    pub store: Option<String>,
    /// Thresholds in effect.
    pub parameters: StoreParameters,
    /// Reversal status for add.
    pub status: EntryStatus,
}

impl ProvenanceEntry {
    fn base(operation: Operation, file: String, parameters: StoreParameters) -> Self {
        Self {
            operation,
            date: timestamp(),
            runtime_secs: 0,
            file,
            records: 0,
            signature: None,
            store: None,
            parameters,
            status: EntryStatus::Active,
        }
    }

    /// Entry written when a store is created from `reference`.
    pub fn bootstrap(reference: &str, parameters: StoreParameters, runtime: Duration) -> Self {
        let mut entry = Self::base(Operation::Bootstrap, reference.to_string(), parameters);
        entry.runtime_secs = runtime.as_secs();
        entry
    }

    /// Entry written after a source has been accumulated.
    pub fn add(source: &SourceIdentity, records: u64, runtime: Duration, parameters: StoreParameters) -> Self {
        let mut entry = Self::base(Operation::Add, source.path_text(), parameters);
        entry.records = records;
        entry.runtime_secs = runtime.as_secs();
        entry.signature = Some(source.signature().to_string());
        entry
    }

    /// Entry written after a source has been taken back out.
    pub fn remove(source: &SourceIdentity, records: u64, runtime: Duration, parameters: StoreParameters) -> Self {
        let mut entry = Self::base(Operation::Remove, source.path_text(), parameters);
        entry.records = records;
        entry.runtime_secs = runtime.as_secs();
        entry.signature = Some(source.signature().to_string());
        entry
    }

    /// Entry written after another store's counters were folded in.
    pub fn merge(
        store_path: &str,
        store_id: &str,
        carried: u64,
        runtime: Duration,
        parameters: StoreParameters,
    ) -> Self {
        let mut entry = Self::base(Operation::Merge, store_path.to_string(), parameters);
        entry.records = carried;
        entry.runtime_secs = runtime.as_secs();
        entry.store = Some(store_id.to_string());
        entry
    }

    /// Whether this is an add that still counts.
    pub fn is_active_add(&self) -> bool {
        self.operation == Operation::Add && self.status == EntryStatus::Active
    }

    /// Parse a record produced by the `Display` impl.
    pub fn parse(record: &str) -> std::result::Result<Self, String> {
        let mut operation = None;
        let mut date = None;
        let mut runtime_secs = None;
        let mut file = None;
        let mut records = None;
        let mut signature = None;
        let mut store = None;
        let mut parameters = StoreParameters::default();
        let mut status = EntryStatus::Active;

        for field in record.split(',') {
            let (key, value) = field
                .split_once(':')
                .ok_or_else(|| format!("field '{}' has no key", field))?;
            match key {
                "MODE" => {
                    operation = Some(
                        Operation::parse(value).ok_or_else(|| format!("unknown mode '{}'", value))?,
                    )
                }
                "DATE" => date = Some(value.to_string()),
                "RUNTIME" => runtime_secs = Some(parse_runtime(value)?),
                "FILE" => file = Some(value.to_string()),
                "RECORDS" => records = Some(parse_number(key, value)?),
                "SIGNATURE" => signature = Some(value.to_string()),
                "STORE" => store = Some(value.to_string()),
                "LOW_READ_COUNT" => parameters.low_read_count = parse_number(key, value)? as u32,
                "NONREF_PERCENT" => parameters.nonref_percent = parse_number(key, value)? as u32,
                "STATUS" => {
                    status = match value {
                        "active" => EntryStatus::Active,
                        "reversed" => EntryStatus::Reversed,
                        other => return Err(format!("unknown status '{}'", other)),
                    }
                }
                _ => {}
            }
        }

        let missing = |key: &str| format!("record '{}' is missing {}", record, key);
        Ok(Self {
            operation: operation.ok_or_else(|| missing("MODE"))?,
            date: date.ok_or_else(|| missing("DATE"))?,
            runtime_secs: runtime_secs.ok_or_else(|| missing("RUNTIME"))?,
            file: file.ok_or_else(|| missing("FILE"))?,
            records: records.ok_or_else(|| missing("RECORDS"))?,
            signature,
            store,
            parameters,
            status,
        })
    }
}

impl fmt::Display for ProvenanceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "MODE:{},DATE:{},RUNTIME:{},FILE:{},RECORDS:{}",
            self.operation,
            self.date,
            format_runtime(self.runtime_secs),
            self.file,
            self.records
        )?;
        if let Some(signature) = &self.signature {
            write!(f, ",SIGNATURE:{}", signature)?;
        }
        if let Some(store) = &self.store {
            write!(f, ",STORE:{}", store)?;
        }
        write!(
            f,
            ",LOW_READ_COUNT:{},NONREF_PERCENT:{}",
            self.parameters.low_read_count, self.parameters.nonref_percent
        )?;
        if self.operation == Operation::Add {
            let status = match self.status {
                EntryStatus::Active => "active",
                EntryStatus::Reversed => "reversed",
            };
            write!(f, ",STATUS:{}", status)?;
        }
        Ok(())
    }
}

fn timestamp() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// `hh:mm:ss` rendering of a wall time in seconds.
pub fn format_runtime(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

fn parse_runtime(value: &str) -> std::result::Result<u64, String> {
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() != 3 {
        return Err(format!("runtime '{}' is not hh:mm:ss", value));
    }
    let mut secs = 0u64;
    for part in parts {
        secs = secs * 60 + parse_number("RUNTIME", part)?;
    }
    Ok(secs)
}

fn parse_number(key: &str, value: &str) -> std::result::Result<u64, String> {
    value
        .parse()
        .map_err(|_| format!("{} value '{}' is not a number", key, value))
}
