//! Natural ("human") ordering of entry names.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

use arbor_core::{SortCriterion, SortSpec};

use crate::entry::DirEntry;

/// Compare names case-insensitively, treating digit runs as numbers.
///
/// `file2` sorts before `file10` and `a.txt` before `B.txt`. Names equal
/// under that rule are ordered lowercase-first so the order stays total.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    compare_runs(a, b).then_with(|| {
        a.chars()
            .map(swap_case)
            .cmp(b.chars().map(swap_case))
    })
}

fn compare_runs(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();
    loop {
        let (ca, cb) = match (left.peek(), right.peek()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => (ca, cb),
        };
        if ca.is_ascii_digit() && cb.is_ascii_digit() {
            let na = take_digits(&mut left);
            let nb = take_digits(&mut right);
            match compare_numeric(&na, &nb) {
                Ordering::Equal => continue,
                other => return other,
            }
        }
        match ca.to_lowercase().cmp(cb.to_lowercase()) {
            Ordering::Equal => {
                left.next();
                right.next();
            }
            other => return other,
        }
    }
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut digits = String::new();
    while let Some(&c) = chars.peek() {
        if !c.is_ascii_digit() {
            break;
        }
        digits.push(c);
        chars.next();
    }
    digits
}

/// Compare digit strings by magnitude without parsing, so any length works.
fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn swap_case(c: char) -> char {
    if c.is_ascii_lowercase() {
        c.to_ascii_uppercase()
    } else if c.is_ascii_uppercase() {
        c.to_ascii_lowercase()
    } else {
        c
    }
}

/// Order two entries under `spec`.
///
/// Creation-time orders fall back to modification time, then to the name.
pub fn compare_entries(a: &DirEntry, b: &DirEntry, spec: SortSpec) -> Ordering {
    let partition = if spec.folders_first {
        b.is_dir.cmp(&a.is_dir)
    } else {
        Ordering::Equal
    };
    partition.then_with(|| match spec.criterion {
        SortCriterion::Name => natural_cmp(&a.name, &b.name),
        SortCriterion::CreatedAsc => a
            .created_or_modified()
            .cmp(&b.created_or_modified())
            .then_with(|| natural_cmp(&a.name, &b.name)),
        SortCriterion::CreatedDesc => b
            .created_or_modified()
            .cmp(&a.created_or_modified())
            .then_with(|| natural_cmp(&a.name, &b.name)),
    })
}

pub fn sort_entries(entries: &mut [DirEntry], spec: SortSpec) {
    entries.sort_by(|a, b| compare_entries(a, b, spec));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::time::{Duration, SystemTime};

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut names: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        names.sort_by(|a, b| natural_cmp(a, b));
        names
    }

    #[test]
    fn test_digit_runs_numeric() {
        assert_eq!(sorted(&["file10", "file2", "file1"]), ["file1", "file2", "file10"]);
    }

    #[test]
    fn test_case_insensitive() {
        assert_eq!(sorted(&["B.txt", "a.txt"]), ["a.txt", "B.txt"]);
    }

    #[test]
    fn test_multiple_digit_runs() {
        assert_eq!(
            sorted(&["v1.10.0", "v1.2.10", "v1.2.9"]),
            ["v1.2.9", "v1.2.10", "v1.10.0"]
        );
    }

    #[test]
    fn test_huge_numbers_do_not_overflow() {
        assert_eq!(
            sorted(&["n99999999999999999999999", "n100000000000000000000000"]),
            ["n99999999999999999999999", "n100000000000000000000000"]
        );
    }

    #[test]
    fn test_prefix_sorts_first() {
        assert_eq!(sorted(&["report-final", "report"]), ["report", "report-final"]);
    }

    #[test]
    fn test_total_order_on_case_and_zero_ties() {
        assert_eq!(natural_cmp("readme", "README"), Ordering::Less);
        assert_ne!(natural_cmp("file01", "file1"), Ordering::Equal);
        assert_eq!(natural_cmp("same", "same"), Ordering::Equal);
    }

    #[test]
    fn test_folders_first() {
        let parent = Path::new("/p");
        let mut entries = vec![
            DirEntry::file("alpha.txt", parent),
            DirEntry::dir("zeta", parent),
            DirEntry::dir("beta", parent),
        ];
        sort_entries(&mut entries, SortSpec::default());
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["beta", "zeta", "alpha.txt"]);

        sort_entries(&mut entries, SortSpec::new(SortCriterion::Name, false));
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["alpha.txt", "beta", "zeta"]);
    }

    #[test]
    fn test_creation_time_orders() {
        let parent = Path::new("/p");
        let base = SystemTime::UNIX_EPOCH + Duration::from_secs(1_000);
        let mut old = DirEntry::file("old", parent);
        old.created = Some(base);
        let mut new = DirEntry::file("new", parent);
        new.modified = Some(base + Duration::from_secs(60));
        let mut entries = vec![new.clone(), old.clone()];

        sort_entries(&mut entries, SortSpec::new(SortCriterion::CreatedAsc, true));
        assert_eq!(entries[0].name, "old");
        sort_entries(&mut entries, SortSpec::new(SortCriterion::CreatedDesc, true));
        assert_eq!(entries[0].name, "new");
    }
}
