//! Class label files.
//!
//! One class per line, in model output order. Lines may carry a leading
//! numeric index (`"0 golden retriever"`), which is dropped. Blank lines are
//! skipped.

use std::path::Path;

use super::PredictorError;

pub fn load_labels(path: &Path) -> Result<Vec<String>, PredictorError> {
    if !path.exists() {
        return Err(PredictorError::ModelNotFound(path.to_path_buf()));
    }
    let raw = std::fs::read_to_string(path)
        .map_err(|e| PredictorError::ModelLoad(format!("could not read {}: {e}", path.display())))?;

    let labels = parse_labels(&raw);
    if labels.is_empty() {
        return Err(PredictorError::ModelLoad(format!(
            "labels file {} lists no classes",
            path.display()
        )));
    }

    tracing::debug!(path = %path.display(), classes = labels.len(), "Labels loaded");
    Ok(labels)
}

pub fn parse_labels(raw: &str) -> Vec<String> {
    raw.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| match line.split_once(char::is_whitespace) {
            Some((index, name)) if index.parse::<usize>().is_ok() && !name.trim().is_empty() => {
                name.trim().to_string()
            }
            _ => line.to_string(),
        })
        .collect()
}
