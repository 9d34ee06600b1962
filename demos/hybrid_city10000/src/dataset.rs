//! Reader for the multi-hypothesis City10000 edge files.
//!
//! Each line reads `<tag> <from> <tag> <to> <tag> <n> x y θ ...` with `n` candidate
//! relative poses. Consecutive indices are odometry, anything else a loop closure.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::pose2::Pose2;

/// Errors raised while reading a dataset.
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Failed to read the dataset")]
    Io(#[from] std::io::Error),

    #[error("Line {line}: {reason}")]
    Malformed { line: usize, reason: String },
}

/// One edge of the dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct Measurement {
    pub key_s: u64,
    pub key_t: u64,
    /// Candidate relative poses, at least one.
    pub poses: Vec<Pose2>,
}

impl Measurement {
    pub fn is_odometry(&self) -> bool {
        self.key_t == self.key_s + 1
    }
}

fn field<T: std::str::FromStr>(fields: &[&str], i: usize, line: usize) -> Result<T, DatasetError> {
    let raw = fields.get(i).ok_or_else(|| DatasetError::Malformed {
        line,
        reason: format!("missing field {i}"),
    })?;
    raw.parse().map_err(|_| DatasetError::Malformed {
        line,
        reason: format!("cannot parse field {i}: {raw:?}"),
    })
}

/// Parse one line; `line` is only used for error messages.
pub fn parse_line(text: &str, line: usize) -> Result<Measurement, DatasetError> {
    let fields: Vec<&str> = text.split_whitespace().collect();
    let key_s: u64 = field(&fields, 1, line)?;
    let key_t: u64 = field(&fields, 3, line)?;
    let count: usize = field(&fields, 5, line)?;
    if count == 0 {
        return Err(DatasetError::Malformed {
            line,
            reason: "no measurement".to_string(),
        });
    }

    let mut poses = Vec::with_capacity(count);
    for i in 0..count {
        let base = 6 + 3 * i;
        poses.push(Pose2::new(
            field(&fields, base, line)?,
            field(&fields, base + 1, line)?,
            field(&fields, base + 2, line)?,
        ));
    }
    Ok(Measurement {
        key_s,
        key_t,
        poses,
    })
}

/// Read at most `max_lines` non empty lines of a dataset file.
pub fn read_dataset(path: &Path, max_lines: usize) -> Result<Vec<Measurement>, DatasetError> {
    let reader = BufReader::new(File::open(path)?);
    let mut measurements = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        if measurements.len() >= max_lines {
            break;
        }
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        measurements.push(parse_line(&line, i + 1)?);
    }
    Ok(measurements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_odometry_with_two_candidates() -> Result<(), DatasetError> {
        let m = parse_line("VERTEX 4 VERTEX 5 N 2 1.0 0.0 0.1 0.9 0.05 0.0", 1)?;
        assert!(m.is_odometry());
        assert_eq!((m.key_s, m.key_t), (4, 5));
        assert_eq!(m.poses.len(), 2);
        assert_eq!(m.poses[1], Pose2::new(0.9, 0.05, 0.0));
        Ok(())
    }

    #[test]
    fn test_parse_rejects_truncated_lines() {
        let err = parse_line("VERTEX 0 VERTEX 9 N 2 1.0 0.0 0.1", 7).unwrap_err();
        assert!(matches!(err, DatasetError::Malformed { line: 7, .. }));
        assert!(parse_line("VERTEX 0 VERTEX 1 N 0", 1).is_err());
        assert!(parse_line("VERTEX a VERTEX 1 N 1 0 0 0", 1).is_err());
    }

    #[test]
    fn test_read_dataset_limits_lines() -> Result<(), Box<dyn std::error::Error>> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "E 0 E 1 N 1 1.0 0.0 0.0")?;
        writeln!(file)?;
        writeln!(file, "E 1 E 2 N 1 1.0 0.0 0.0")?;
        writeln!(file, "E 2 E 0 N 1 -2.0 0.0 0.0")?;

        let all = read_dataset(file.path(), usize::MAX)?;
        assert_eq!(all.len(), 3);
        assert!(!all[2].is_odometry());
        assert_eq!(read_dataset(file.path(), 2)?.len(), 2);
        Ok(())
    }
}
