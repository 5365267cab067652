//! Input resolution: turn a user-supplied path into the list of PDFs to
//! process and derive each document's id.
//!
//! A directory is listed non-recursively and sorted by file name so runs are
//! reproducible and `max_files` always takes the same prefix. The `%PDF`
//! magic-byte check happens per document, just before rendering, so one
//! mislabelled file fails on its own instead of aborting discovery.

use crate::error::ExtractError;
use regex::Regex;
use std::io::Read;
use std::path::{Path, PathBuf};
use tracing::debug;

/// List the PDFs named by `input`: the file itself, or every `*.pdf` in a
/// directory (case-insensitive extension), sorted.
pub fn discover_documents(input: &Path) -> Result<Vec<PathBuf>, ExtractError> {
    if !input.exists() {
        return Err(ExtractError::FileNotFound {
            path: input.to_path_buf(),
        });
    }
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }

    let entries = std::fs::read_dir(input).map_err(|e| ExtractError::Internal(format!(
        "Failed to list directory '{}': {}",
        input.display(),
        e
    )))?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && has_pdf_extension(p))
        .collect();
    files.sort();
    debug!("Found {} PDF file(s) in {}", files.len(), input.display());
    Ok(files)
}

fn has_pdf_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("pdf"))
}

/// Verify the file starts with `%PDF`.
pub fn check_pdf_magic(path: &Path) -> Result<(), ExtractError> {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(_) => {
            return Err(ExtractError::FileNotFound {
                path: path.to_path_buf(),
            })
        }
    };
    let mut magic = [0u8; 4];
    if file.read_exact(&mut magic).is_err() || &magic != b"%PDF" {
        return Err(ExtractError::NotAPdf {
            path: path.to_path_buf(),
            magic,
        });
    }
    Ok(())
}

/// Document id from the file name: the first match of `pattern`, or the
/// file stem when the pattern does not match.
pub fn document_id(path: &Path, pattern: &Regex) -> String {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    if let Some(m) = pattern.find(&file_name) {
        return m.as_str().to_string();
    }
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_pattern() -> Regex {
        Regex::new(r"key_(\d+)").unwrap()
    }

    #[test]
    fn test_document_id_from_pattern() {
        assert_eq!(
            document_id(Path::new("/data/Stephens_report_key_12345.pdf"), &key_pattern()),
            "key_12345"
        );
    }

    #[test]
    fn test_document_id_falls_back_to_stem() {
        assert_eq!(document_id(Path::new("/data/annual.pdf"), &key_pattern()), "annual");
    }

    #[test]
    fn test_discover_directory_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b_key_2.pdf", "a_key_1.PDF", "notes.txt", "c_key_3.pdf"] {
            std::fs::write(dir.path().join(name), b"%PDF-1.4").unwrap();
        }
        std::fs::create_dir(dir.path().join("nested.pdf")).unwrap();

        let files = discover_documents(dir.path()).unwrap();
        let names: Vec<String> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["a_key_1.PDF", "b_key_2.pdf", "c_key_3.pdf"]);
    }

    #[test]
    fn test_discover_single_file_and_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("one.pdf");
        std::fs::write(&file, b"%PDF-1.7").unwrap();
        assert_eq!(discover_documents(&file).unwrap(), vec![file]);

        let err = discover_documents(&dir.path().join("missing")).unwrap_err();
        assert!(matches!(err, ExtractError::FileNotFound { .. }));
    }

    #[test]
    fn test_check_pdf_magic() {
        let dir = tempfile::tempdir().unwrap();
        let good = dir.path().join("good.pdf");
        let bad = dir.path().join("bad.pdf");
        std::fs::write(&good, b"%PDF-1.4\n...").unwrap();
        std::fs::write(&bad, b"<html>").unwrap();

        assert!(check_pdf_magic(&good).is_ok());
        match check_pdf_magic(&bad) {
            Err(ExtractError::NotAPdf { magic, .. }) => assert_eq!(&magic, b"<htm"),
            other => panic!("expected NotAPdf, got {other:?}"),
        }
    }
}
