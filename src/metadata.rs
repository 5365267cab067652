//! Metadata source: document headlines keyed by document id.
//!
//! The source is a CSV file with at least `document_id` and `headline`
//! columns; other columns are ignored. Headlines are stored lower-cased so
//! skip-term matching is case-insensitive.

use crate::error::ExtractError;
use crate::output::MetadataFlags;
use crate::pipeline::classify::matching_skip_term;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct MetadataRow {
    document_id: String,
    headline: String,
}

/// In-memory lookup of headlines by document id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetadataIndex {
    headlines: HashMap<String, String>,
}

impl MetadataIndex {
    /// Load the index from a CSV file.
    ///
    /// A missing file, a missing required column or an unparseable row is a
    /// [`ExtractError::MetadataLoad`].
    pub fn from_csv(path: &Path) -> Result<Self, ExtractError> {
        let load_err = |detail: String| ExtractError::MetadataLoad {
            path: path.to_path_buf(),
            detail,
        };

        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_path(path)
            .map_err(|e| load_err(e.to_string()))?;

        let mut headlines = HashMap::new();
        for (line, row) in reader.deserialize::<MetadataRow>().enumerate() {
            let row = row.map_err(|e| load_err(format!("row {}: {}", line + 2, e)))?;
            if row.document_id.is_empty() {
                warn!("Metadata row {} has an empty document_id; ignored", line + 2);
                continue;
            }
            headlines.insert(row.document_id, row.headline.to_lowercase());
        }

        info!("Loaded metadata for {} documents from {}", headlines.len(), path.display());
        Ok(Self { headlines })
    }

    /// Build an index from `(document_id, headline)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        Self {
            headlines: pairs
                .into_iter()
                .map(|(k, v)| (k.into(), v.as_ref().to_lowercase()))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.headlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headlines.is_empty()
    }

    /// Lower-cased headline of `document_id`.
    pub fn headline(&self, document_id: &str) -> Option<&str> {
        self.headlines.get(document_id).map(String::as_str)
    }

    /// What the source says about `document_id`.
    pub fn flags_for(&self, document_id: &str, skip_terms: &[String]) -> MetadataFlags {
        match self.headline(document_id) {
            Some(headline) => MetadataFlags {
                in_metadata: true,
                headline: Some(headline.to_string()),
                termination: matching_skip_term(headline, skip_terms).is_some(),
            },
            None => MetadataFlags::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn terms() -> Vec<String> {
        vec!["termination".into(), "dropping".into()]
    }

    #[test]
    fn test_load_csv_with_extra_columns() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "document_id,date,headline").unwrap();
        writeln!(file, "key_1,2019-01-02,\"Dropping Coverage of XYZ\"").unwrap();
        writeln!(file, "key_2,2019-01-03,\"Initiating coverage, Buy\"").unwrap();
        file.flush().unwrap();

        let index = MetadataIndex::from_csv(file.path()).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.headline("key_1"), Some("dropping coverage of xyz"));
    }

    #[test]
    fn test_missing_column_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "document_id,title").unwrap();
        writeln!(file, "key_1,Something").unwrap();
        file.flush().unwrap();

        let err = MetadataIndex::from_csv(file.path()).unwrap_err();
        assert!(matches!(err, ExtractError::MetadataLoad { .. }));
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = MetadataIndex::from_csv(Path::new("/nonexistent/meta.csv")).unwrap_err();
        assert!(matches!(err, ExtractError::MetadataLoad { .. }));
    }

    #[test]
    fn test_flags_for() {
        let index = MetadataIndex::from_pairs([
            ("key_1", "Dropping Coverage of XYZ"),
            ("key_2", "Q3 preview"),
        ]);

        let dropped = index.flags_for("key_1", &terms());
        assert!(dropped.in_metadata && dropped.termination);

        let normal = index.flags_for("key_2", &terms());
        assert!(normal.in_metadata && !normal.termination);
        assert_eq!(normal.headline.as_deref(), Some("q3 preview"));

        assert_eq!(index.flags_for("key_9", &terms()), MetadataFlags::default());
    }
}
