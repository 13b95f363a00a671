//! Candidate position lists: `chr<TAB>pos` lines or BED intervals.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::{PileupError, Result};

/// Sorted, de-duplicated 1-based positions on `chromosome` listed in `path`.
///
/// Blank lines, `#` comments and `track`/`browser` lines are ignored. A line
/// with three or more columns whose second and third are integers is read as
/// a BED interval (0-based start, exclusive end).
pub fn read_candidates(path: &Path, chromosome: &str) -> Result<Vec<u64>> {
    let file = File::open(path).map_err(|e| PileupError::io(path, e))?;
    let mut positions = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| PileupError::io(path, e))?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with("track") || line.starts_with("browser") {
            continue;
        }
        let fields: Vec<&str> = line.split('\t').collect();
        if fields[0] != chromosome {
            continue;
        }
        let bad_line = |reason: &str| {
            PileupError::InvalidConfiguration(format!(
                "{} line {}: {}",
                path.display(),
                index + 1,
                reason
            ))
        };
        let number = |i: usize| fields.get(i).and_then(|f| f.trim().parse::<u64>().ok());
        match (number(1), number(2)) {
            (Some(start0), Some(end)) => {
                if end <= start0 {
                    return Err(bad_line("empty BED interval"));
                }
                positions.extend(start0 + 1..=end);
            }
            (Some(pos), _) if pos >= 1 => positions.push(pos),
            _ => return Err(bad_line("expected chromosome and position")),
        }
    }
    positions.sort_unstable();
    positions.dedup();
    Ok(positions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn list(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn reads_positions_for_one_chromosome() {
        let file = list("# header\nchr1\t12\nchr2\t5\nchr1\t3\nchr1\t12\n");
        assert_eq!(read_candidates(file.path(), "chr1").unwrap(), vec![3, 12]);
    }

    #[test]
    fn bed_intervals_are_half_open() {
        let file = list("track name=x\nchr1\t9\t12\tpeak\n");
        assert_eq!(read_candidates(file.path(), "chr1").unwrap(), vec![10, 11, 12]);
    }

    #[test]
    fn malformed_lines_are_reported() {
        let file = list("chr1\tten\n");
        assert!(matches!(
            read_candidates(file.path(), "chr1"),
            Err(PileupError::InvalidConfiguration(_))
        ));
    }
}
