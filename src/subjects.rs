//! Subject list resolution and array index mapping
//!
//! Subjects come from a file (one ID per line) or an inline whitespace-separated
//! list. The resolved list is numerically sorted and maps 1:1 to the 1-based Slurm
//! array indices, so position `i` in sorted order is array task `i`.

use std::cmp::Ordering;
use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use log::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectList {
    subjects: Vec<String>,
}

impl SubjectList {
    /// Resolve a subject source into a sorted list.
    ///
    /// If `source` names a regular file it is read line by line (a final line
    /// without a trailing newline is still included); otherwise the string itself
    /// is split on whitespace.
    pub fn resolve(source: &str) -> Result<SubjectList> {
        let path = Path::new(source);
        let raw = if path.is_file() {
            info!("Reading subject list from file {}", path.display());
            fs::read_to_string(path)
                .with_context(|| format!("Can't read subject file {}", path.display()))?
        } else {
            source.to_string()
        };

        let mut subjects: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
        if subjects.is_empty() {
            bail!("Resolved subject list is empty");
        }
        subjects.sort_by(|a, b| numeric_cmp(a, b));
        info!("Resolved {} subjects", subjects.len());

        Ok(SubjectList { subjects })
    }

    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Comma-joined contiguous array specification `1,2,...,N`.
    pub fn array_spec(&self) -> String {
        (1..=self.subjects.len())
            .map(|i| i.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Subject at 1-based array position `index`.
    ///
    /// An index of 0 or one past the end of the list is an error, never an empty
    /// subject ID.
    pub fn subject_at(&self, index: usize) -> Result<&str> {
        if index == 0 || index > self.subjects.len() {
            bail!(
                "Array task index {} is outside the subject list (1..={})",
                index,
                self.subjects.len()
            );
        }
        Ok(&self.subjects[index - 1])
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.subjects.iter().map(String::as_str)
    }
}

/// Numeric IDs compare by value; anything non-numeric sorts after them, lexicographically.
fn numeric_cmp(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;
    use std::io::Write;

    use super::*;

    #[test]
    fn inline_list_is_sorted_numerically() {
        let list = SubjectList::resolve("5 2 10").unwrap();
        let subjects: Vec<&str> = list.iter().collect();
        assert_eq!(subjects, vec!["2", "5", "10"]);
        assert_eq!(list.array_spec(), "1,2,3");
    }

    #[test]
    fn file_without_trailing_newline_keeps_last_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.txt");
        let mut file = fs::File::create(&path).unwrap();
        write!(file, "5\n2\n10").unwrap();

        let list = SubjectList::resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(list.len(), 3);
        let subjects: Vec<&str> = list.iter().collect();
        assert_eq!(subjects, vec!["2", "5", "10"]);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subjects.txt");
        fs::write(&path, "3\n\n1\n\n").unwrap();

        let list = SubjectList::resolve(path.to_str().unwrap()).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.array_spec(), "1,2");
    }

    #[test]
    fn task_index_resolves_sorted_position() {
        let list = SubjectList::resolve("5 2 10").unwrap();
        assert_eq!(list.subject_at(1).unwrap(), "2");
        assert_eq!(list.subject_at(2).unwrap(), "5");
        assert_eq!(list.subject_at(3).unwrap(), "10");
    }

    #[test]
    fn out_of_range_index_is_an_error() {
        let list = SubjectList::resolve("5 2 10").unwrap();
        assert!(list.subject_at(0).is_err());
        assert!(list.subject_at(4).is_err());
    }

    #[test]
    fn non_numeric_ids_sort_after_numeric() {
        let list = SubjectList::resolve("sub-b 12 sub-a 3").unwrap();
        let subjects: Vec<&str> = list.iter().collect();
        assert_eq!(subjects, vec!["3", "12", "sub-a", "sub-b"]);
    }

    #[test]
    fn empty_source_is_an_error() {
        assert!(SubjectList::resolve("   ").is_err());
    }
}
