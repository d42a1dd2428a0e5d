//! Run artifact persistence.
//!
//! A categorize run leaves a single pretty-printed JSON file behind. `apply`
//! reads it back, so the file is written atomically and its schema version is
//! checked on load.

use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument};

use linksort_shared::{
    CURRENT_SCHEMA_VERSION, LinksortError, Result, RunArtifact, RunId,
};

use crate::categorize::CategorizeResult;

/// Build the artifact for a categorize run. Mark it `partial` afterwards when
/// `result` holds only the batches that completed.
pub fn build_artifact(
    run_id: RunId,
    user_id: &str,
    model: &str,
    batch_size: usize,
    result: &CategorizeResult,
) -> RunArtifact {
    RunArtifact {
        schema_version: CURRENT_SCHEMA_VERSION,
        run_id,
        user_id: user_id.to_string(),
        created_at: Utc::now(),
        model: model.to_string(),
        batch_size,
        hallucinations: result.hallucinations,
        partial: false,
        vocabulary: result.vocabulary.clone(),
        items: result.items.clone(),
    }
}

/// Default file name for a run's artifact.
pub fn default_artifact_path(run_id: &RunId) -> PathBuf {
    PathBuf::from(format!("linksort-run-{run_id}.json"))
}

/// Write `artifact` to `path` (temp file, then rename).
#[instrument(skip_all, fields(path = %path.display()))]
pub fn write_artifact(path: &Path, artifact: &RunArtifact) -> Result<()> {
    let json = serde_json::to_string_pretty(artifact).map_err(|e| {
        LinksortError::validation(format!("JSON serialization failed: {e}"))
    })?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| LinksortError::io(parent, e))?;
    }

    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| LinksortError::validation("artifact path has no file name"))?;
    let temp = path.with_file_name(format!(".{file_name}.tmp"));

    std::fs::write(&temp, json).map_err(|e| LinksortError::io(&temp, e))?;
    std::fs::rename(&temp, path).map_err(|e| LinksortError::io(path, e))?;

    info!(run_id = %artifact.run_id, items = artifact.items.len(), "wrote run artifact");
    Ok(())
}

/// Load and validate a run artifact.
#[instrument(skip_all, fields(path = %path.display()))]
pub fn read_artifact(path: &Path) -> Result<RunArtifact> {
    let content = std::fs::read_to_string(path).map_err(|e| LinksortError::io(path, e))?;

    let artifact: RunArtifact = serde_json::from_str(&content).map_err(|e| {
        LinksortError::validation(format!("invalid run artifact: {e}"))
    })?;

    if artifact.schema_version != CURRENT_SCHEMA_VERSION {
        return Err(LinksortError::validation(format!(
            "unsupported run artifact schema version {} (expected {CURRENT_SCHEMA_VERSION})",
            artifact.schema_version
        )));
    }

    debug!(run_id = %artifact.run_id, items = artifact.items.len(), "loaded run artifact");
    Ok(artifact)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use linksort_shared::Item;

    fn temp_dir() -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "linksort-artifact-test-{}",
            uuid::Uuid::now_v7()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn make_result() -> CategorizeResult {
        CategorizeResult {
            items: vec![Item {
                id: 5,
                url: "https://example.com/5".into(),
                title: "Five".into(),
                snippet: String::new(),
                topics: vec!["rust".into()],
            }],
            vocabulary: vec!["rust".into(), "web".into()],
            new_topics: vec!["rust".into()],
            hallucinations: 2,
            batches: 1,
            links_fetched: 1,
            pages_failed: vec![],
            elapsed: Duration::from_millis(10),
        }
    }

    #[test]
    fn artifact_survives_write_and_read() {
        let tmp = temp_dir();
        let path = tmp.join("nested").join("run.json");
        let artifact = build_artifact(RunId::new(), "42", "gpt-4-turbo", 20, &make_result());

        write_artifact(&path, &artifact).unwrap();
        let loaded = read_artifact(&path).unwrap();

        assert_eq!(loaded.run_id, artifact.run_id);
        assert_eq!(loaded.items, artifact.items);
        assert_eq!(loaded.hallucinations, 2);
        assert_eq!(loaded.vocabulary, vec!["rust", "web"]);
        assert!(!loaded.partial);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn partial_flag_survives_write_and_read() {
        let tmp = temp_dir();
        let path = tmp.join("run.json");
        let mut artifact = build_artifact(RunId::new(), "42", "m", 5, &make_result());
        artifact.partial = true;

        write_artifact(&path, &artifact).unwrap();
        assert!(read_artifact(&path).unwrap().partial);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn write_leaves_no_temp_files() {
        let tmp = temp_dir();
        let path = tmp.join("run.json");
        let artifact = build_artifact(RunId::new(), "42", "m", 5, &make_result());

        write_artifact(&path, &artifact).unwrap();
        write_artifact(&path, &artifact).unwrap();

        for entry in std::fs::read_dir(&tmp).unwrap() {
            let name = entry.unwrap().file_name().to_string_lossy().to_string();
            assert!(!name.starts_with('.'), "temp file left behind: {name}");
        }

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn read_rejects_unknown_schema_version() {
        let tmp = temp_dir();
        let path = tmp.join("run.json");
        let mut artifact = build_artifact(RunId::new(), "42", "m", 5, &make_result());
        artifact.schema_version = CURRENT_SCHEMA_VERSION + 1;
        write_artifact(&path, &artifact).unwrap();

        let err = read_artifact(&path).unwrap_err();
        assert!(err.to_string().contains("schema version"));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn read_missing_file_is_io_error() {
        let tmp = temp_dir();
        let err = read_artifact(&tmp.join("absent.json")).unwrap_err();
        assert!(matches!(err, LinksortError::Io { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn default_path_names_the_run() {
        let run_id = RunId::new();
        let path = default_artifact_path(&run_id);
        assert_eq!(path.to_string_lossy(), format!("linksort-run-{run_id}.json"));
    }
}
