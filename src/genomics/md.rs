//! MD tag decoding.

/// One run of an MD string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MdOp {
    /// Bases equal to the reference.
    Match(u32),
    /// One base differing from the reference, which holds the given base.
    Mismatch(u8),
    /// Reference bases deleted from the read.
    Deletion(Vec<u8>),
}

/// Parsed MD tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MdTag {
    ops: Vec<MdOp>,
}

impl MdTag {
    /// Parse `[0-9]+(([A-Z]|\^[A-Z]+)[0-9]+)*`.
    pub fn parse(text: &str) -> Result<Self, String> {
        let bytes = text.as_bytes();
        let mut ops = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            let b = bytes[i];
            if b.is_ascii_digit() {
                let mut n: u32 = 0;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    n = n
                        .checked_mul(10)
                        .and_then(|n| n.checked_add(u32::from(bytes[i] - b'0')))
                        .ok_or_else(|| format!("MD run too long in '{}'", text))?;
                    i += 1;
                }
                if n > 0 {
                    ops.push(MdOp::Match(n));
                }
            } else if b == b'^' {
                i += 1;
                let start = i;
                while i < bytes.len() && bytes[i].is_ascii_alphabetic() {
                    i += 1;
                }
                if start == i {
                    return Err(format!("empty deletion in MD '{}'", text));
                }
                ops.push(MdOp::Deletion(bytes[start..i].to_ascii_uppercase()));
            } else if b.is_ascii_alphabetic() {
                ops.push(MdOp::Mismatch(b.to_ascii_uppercase()));
                i += 1;
            } else {
                return Err(format!("unexpected '{}' in MD '{}'", b as char, text));
            }
        }
        Ok(Self { ops })
    }

    /// Runs in order.
    pub fn ops(&self) -> &[MdOp] {
        &self.ops
    }

    /// One flag per aligned read base (deletions excluded): `true` where the
    /// base differs from the reference.
    pub fn mismatch_mask(&self) -> Vec<bool> {
        let mut mask = Vec::new();
        for op in &self.ops {
            match op {
                MdOp::Match(n) => mask.extend(std::iter::repeat(false).take(*n as usize)),
                MdOp::Mismatch(_) => mask.push(true),
                MdOp::Deletion(_) => {}
            }
        }
        mask
    }
}
