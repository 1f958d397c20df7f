//! Locating the stems the separation tool wrote.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::SeparationError;
use crate::job::Stem;

/// Finds every expected stem under `output_root`.
///
/// The tool nests its output as `<root>/<model>/<track>/<stem>.wav`; the
/// first file found for each stem wins. Stems that were not requested, such as
/// `guitar` and `piano` from six-source models, are ignored.
pub fn collect_expected(
    output_root: &Path,
    expected: &[Stem],
) -> Result<Vec<(Stem, PathBuf)>, SeparationError> {
    let mut found: HashMap<Stem, PathBuf> = HashMap::new();

    for entry in WalkDir::new(output_root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        let file_name = entry.file_name().to_string_lossy();
        if let Some(stem) = expected.iter().find(|s| s.file_name() == file_name) {
            found
                .entry(*stem)
                .or_insert_with(|| entry.path().to_path_buf());
        }
    }

    let missing: Vec<&str> = expected
        .iter()
        .filter(|s| !found.contains_key(*s))
        .map(|s| s.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(SeparationError::MissingOutputs {
            missing: missing.join(", "),
            diagnostics: String::new(),
        });
    }

    Ok(expected
        .iter()
        .filter_map(|s| found.remove(s).map(|path| (*s, path)))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"RIFF").unwrap();
    }

    #[test]
    fn test_collects_in_expected_order() {
        let temp_dir = TempDir::new().unwrap();
        let track = temp_dir.path().join("htdemucs/input");
        touch(&track.join("no_vocals.wav"));
        touch(&track.join("vocals.wav"));

        let stems = collect_expected(temp_dir.path(), &[Stem::Vocals, Stem::NoVocals]).unwrap();

        assert_eq!(stems.len(), 2);
        assert_eq!(stems[0].0, Stem::Vocals);
        assert_eq!(stems[0].1, track.join("vocals.wav"));
        assert_eq!(stems[1].0, Stem::NoVocals);
    }

    #[test]
    fn test_extra_stems_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let track = temp_dir.path().join("htdemucs_6s/input");
        for name in ["vocals", "drums", "bass", "other", "guitar", "piano"] {
            touch(&track.join(format!("{}.wav", name)));
        }

        let expected = [Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other];
        let stems = collect_expected(temp_dir.path(), &expected).unwrap();
        let names: Vec<Stem> = stems.iter().map(|(s, _)| *s).collect();
        assert_eq!(names, expected.to_vec());
    }

    #[test]
    fn test_missing_stems_reported() {
        let temp_dir = TempDir::new().unwrap();
        touch(&temp_dir.path().join("htdemucs/input/vocals.wav"));

        let err = collect_expected(
            temp_dir.path(),
            &[Stem::Vocals, Stem::Drums, Stem::Bass, Stem::Other],
        )
        .unwrap_err();

        match err {
            SeparationError::MissingOutputs { missing, .. } => assert_eq!(missing, "drums, bass, other"),
            other => panic!("Expected MissingOutputs, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_root_means_nothing_found() {
        let temp_dir = TempDir::new().unwrap();
        let err = collect_expected(&temp_dir.path().join("absent"), &[Stem::Vocals]).unwrap_err();
        assert!(matches!(err, SeparationError::MissingOutputs { .. }));
    }
}
