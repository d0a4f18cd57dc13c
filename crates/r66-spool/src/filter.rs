//! Filename filter

use crate::error::Result;
use regex::Regex;
use std::path::Path;

/// Predicate over file names
///
/// The pattern must match the whole file name (not the path). Directories
/// always pass so recursive scans can descend into them.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    regex: Option<Regex>,
}

impl FileFilter {
    /// Build a filter from an optional pattern.
    ///
    /// # Errors
    ///
    /// Returns [`crate::SpoolError::Regex`] if the pattern does not compile.
    pub fn new(pattern: Option<&str>) -> Result<Self> {
        let regex = match pattern {
            Some(p) => Some(Regex::new(&format!("^(?:{p})$"))?),
            None => None,
        };
        Ok(Self { regex })
    }

    /// Filter accepting every file.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Whether a file name matches.
    pub fn matches_name(&self, name: &str) -> bool {
        self.regex.as_ref().is_none_or(|re| re.is_match(name))
    }

    /// Whether an entry passes the filter.
    pub fn accepts(&self, path: &Path, is_dir: bool) -> bool {
        if is_dir {
            return true;
        }
        match path.file_name() {
            Some(name) => self.matches_name(&name.to_string_lossy()),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whole_name_match() {
        let filter = FileFilter::new(Some(r".*\.txt")).unwrap();
        assert!(filter.matches_name("a.txt"));
        assert!(!filter.matches_name("a.txt.tmp"));
        assert!(!filter.matches_name("a.TXT"));

        // A bare prefix does not match longer names
        let filter = FileFilter::new(Some("data")).unwrap();
        assert!(filter.matches_name("data"));
        assert!(!filter.matches_name("data1"));
    }

    #[test]
    fn test_alternation_stays_anchored() {
        let filter = FileFilter::new(Some("a|b")).unwrap();
        assert!(filter.matches_name("a"));
        assert!(filter.matches_name("b"));
        assert!(!filter.matches_name("ab"));
    }

    #[test]
    fn test_directories_never_filtered() {
        let filter = FileFilter::new(Some(r".*\.csv")).unwrap();
        assert!(filter.accepts(Path::new("/in/sub"), true));
        assert!(!filter.accepts(Path::new("/in/sub/a.txt"), false));
        assert!(filter.accepts(Path::new("/in/sub/a.csv"), false));
    }

    #[test]
    fn test_no_pattern_accepts_all() {
        let filter = FileFilter::accept_all();
        assert!(filter.accepts(Path::new("/in/anything"), false));
    }

    #[test]
    fn test_bad_pattern() {
        assert!(FileFilter::new(Some("(unclosed")).is_err());
    }
}
