use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};

use super::types::Identifier;

/// Identifiers loaded from a line-delimited file, in file order.
pub struct TaskSource {
    pub identifiers: Vec<Identifier>,
    pub duplicates: usize,
}

pub fn load_identifiers(path: &Path) -> Result<TaskSource> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("read input file {}", path.display()))?;
    Ok(parse_identifiers(&raw))
}

pub fn parse_identifiers(raw: &str) -> TaskSource {
    let identifiers: Vec<Identifier> = raw
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(Identifier::new)
        .collect();
    let unique: HashSet<&Identifier> = identifiers.iter().collect();
    let duplicates = identifiers.len() - unique.len();
    TaskSource { identifiers, duplicates }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn blank_lines_are_skipped_and_lines_trimmed() {
        let src = parse_identifiers("  A-1 \n\n\r\nB-2\r\n   \nC-3");
        let ids: Vec<&str> = src.identifiers.iter().map(|i| i.as_str()).collect();
        assert_eq!(ids, vec!["A-1", "B-2", "C-3"]);
        assert_eq!(src.duplicates, 0);
    }

    #[test]
    fn duplicates_are_kept_and_counted() {
        let src = parse_identifiers("X\nY\nX\nX\n");
        assert_eq!(src.identifiers.len(), 4);
        assert_eq!(src.duplicates, 2);
    }

    #[test]
    fn loads_from_file() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "P1\nP2\n\nP3").unwrap();
        let src = load_identifiers(f.path()).unwrap();
        assert_eq!(src.identifiers.len(), 3);
    }

    #[test]
    fn missing_file_is_an_error_naming_the_path() {
        let err = load_identifiers(Path::new("/no/such/ids.txt")).err().unwrap();
        assert!(format!("{:#}", err).contains("/no/such/ids.txt"));
    }
}
