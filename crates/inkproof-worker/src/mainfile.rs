use std::path::{Path, PathBuf};

/// Errors from main-file resolution.
#[derive(Debug, thiserror::Error)]
#[error("main file missing (requested {requested:?}); extracted paths: {extracted:?}")]
pub struct MainFileError {
    /// The main file name requested by the submitter.
    pub requested: String,
    /// Every path actually extracted from the source archive, for diagnostics.
    pub extracted: Vec<String>,
}

/// Resolve which extracted path is the compile entry point, per the ordered
/// rules: the requested name verbatim, the requested name with its
/// extension added/stripped, the literal `main.tex`, or — failing all of
/// those — the sole `.tex` file in the tree if there is exactly one.
pub fn resolve_main_file(requested: &str, extracted: &[PathBuf]) -> Result<PathBuf, MainFileError> {
    let mut candidates: Vec<String> = Vec::new();
    if !requested.is_empty() {
        candidates.push(requested.to_string());
        if Path::new(requested).extension().is_some() {
            if let Some((stem, _ext)) = requested.rsplit_once('.') {
                candidates.push(stem.to_string());
            }
        } else {
            candidates.push(format!("{requested}.tex"));
        }
    }
    candidates.push("main.tex".to_string());

    for candidate in &candidates {
        if let Some(found) = find_candidate(candidate, extracted) {
            return Ok(found);
        }
    }

    let tex_files: Vec<&PathBuf> = extracted
        .iter()
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("tex"))
        .collect();
    if let [only] = tex_files.as_slice() {
        return Ok((*only).clone());
    }

    Err(MainFileError {
        requested: requested.to_string(),
        extracted: extracted.iter().map(|p| p.display().to_string()).collect(),
    })
}

fn find_candidate(candidate: &str, extracted: &[PathBuf]) -> Option<PathBuf> {
    let candidate_path = Path::new(candidate);
    extracted
        .iter()
        .find(|p| p.as_path() == candidate_path || p.file_name() == candidate_path.file_name())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn resolves_exact_requested_name() {
        let extracted = paths(&["thesis.tex", "refs.bib"]);
        let found = resolve_main_file("thesis.tex", &extracted).unwrap();
        assert_eq!(found, PathBuf::from("thesis.tex"));
    }

    #[test]
    fn appends_tex_extension_when_missing() {
        let extracted = paths(&["thesis.tex"]);
        let found = resolve_main_file("thesis", &extracted).unwrap();
        assert_eq!(found, PathBuf::from("thesis.tex"));
    }

    #[test]
    fn strips_extension_when_requested_has_one_but_extracted_does_not() {
        let extracted = paths(&["thesis"]);
        let found = resolve_main_file("thesis.tex", &extracted).unwrap();
        assert_eq!(found, PathBuf::from("thesis"));
    }

    #[test]
    fn falls_back_to_literal_main_tex() {
        let extracted = paths(&["main.tex", "chapter1.tex"]);
        let found = resolve_main_file("", &extracted).unwrap();
        assert_eq!(found, PathBuf::from("main.tex"));
    }

    #[test]
    fn falls_back_to_sole_tex_file() {
        let extracted = paths(&["report.tex", "figures/plot.png"]);
        let found = resolve_main_file("", &extracted).unwrap();
        assert_eq!(found, PathBuf::from("report.tex"));
    }

    #[test]
    fn fails_when_ambiguous_and_nothing_matches() {
        let extracted = paths(&["a.tex", "b.tex"]);
        let err = resolve_main_file("missing", &extracted).unwrap_err();
        assert_eq!(err.requested, "missing");
        assert_eq!(err.extracted.len(), 2);
    }
}
