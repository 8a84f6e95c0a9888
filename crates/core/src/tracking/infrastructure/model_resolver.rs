use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelResolveError {
    #[error("model file not found: {0}")]
    ExplicitMissing(PathBuf),
    #[error("model {name} not found in {}", searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    NotFound { name: String, searched: Vec<PathBuf> },
    #[error("could not determine cache directory")]
    NoCacheDir,
}

/// Resolve a model file by name.
///
/// Resolution order:
/// 1. Explicit path, which must exist
/// 2. User cache directory (platform-specific)
/// 3. Bundled directory (development / pre-packaged installs)
///
/// Models are never downloaded; they have to be installed into one of the
/// searched locations.
pub fn resolve(
    name: &str,
    explicit: Option<&Path>,
    bundled_dir: Option<&Path>,
) -> Result<PathBuf, ModelResolveError> {
    let cache_dir = model_cache_dir().ok();
    resolve_in(name, explicit, cache_dir.as_deref(), bundled_dir)
}

fn resolve_in(
    name: &str,
    explicit: Option<&Path>,
    cache_dir: Option<&Path>,
    bundled_dir: Option<&Path>,
) -> Result<PathBuf, ModelResolveError> {
    if let Some(path) = explicit {
        return if path.is_file() {
            Ok(path.to_path_buf())
        } else {
            Err(ModelResolveError::ExplicitMissing(path.to_path_buf()))
        };
    }

    let searched: Vec<PathBuf> = [cache_dir, bundled_dir]
        .into_iter()
        .flatten()
        .map(|dir| dir.join(name))
        .collect();
    if searched.is_empty() {
        return Err(ModelResolveError::NoCacheDir);
    }
    match searched.iter().find(|p| p.is_file()) {
        Some(found) => Ok(found.clone()),
        None => Err(ModelResolveError::NotFound {
            name: name.to_string(),
            searched,
        }),
    }
}

/// Platform-specific model cache directory.
///
/// - macOS: `~/Library/Application Support/bodyflow/models/`
/// - Linux: `$XDG_CACHE_HOME/bodyflow/models/` or `~/.cache/bodyflow/models/`
/// - Windows: `%LOCALAPPDATA%/bodyflow/models/`
pub fn model_cache_dir() -> Result<PathBuf, ModelResolveError> {
    #[cfg(target_os = "macos")]
    {
        dirs::data_dir()
            .map(|d| d.join("bodyflow").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
    #[cfg(not(target_os = "macos"))]
    {
        dirs::cache_dir()
            .map(|d| d.join("bodyflow").join("models"))
            .ok_or(ModelResolveError::NoCacheDir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_explicit_path_wins() {
        let tmp = TempDir::new().unwrap();
        let explicit = tmp.path().join("custom.onnx");
        fs::write(&explicit, b"model").unwrap();
        let cache = tmp.path().join("cache");
        fs::create_dir_all(&cache).unwrap();
        fs::write(cache.join("m.onnx"), b"cached").unwrap();

        let found = resolve_in("m.onnx", Some(&explicit), Some(&cache), None).unwrap();
        assert_eq!(found, explicit);
    }

    #[test]
    fn test_missing_explicit_path_is_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.onnx");
        assert!(matches!(
            resolve_in("m.onnx", Some(&missing), None, None),
            Err(ModelResolveError::ExplicitMissing(_))
        ));
    }

    #[test]
    fn test_cache_checked_before_bundled() {
        let tmp = TempDir::new().unwrap();
        let cache = tmp.path().join("cache");
        let bundled = tmp.path().join("bundled");
        fs::create_dir_all(&cache).unwrap();
        fs::create_dir_all(&bundled).unwrap();
        fs::write(cache.join("m.onnx"), b"cached").unwrap();
        fs::write(bundled.join("m.onnx"), b"bundled").unwrap();

        let found = resolve_in("m.onnx", None, Some(&cache), Some(&bundled)).unwrap();
        assert_eq!(fs::read(found).unwrap(), b"cached");
    }

    #[test]
    fn test_falls_back_to_bundled() {
        let tmp = TempDir::new().unwrap();
        let bundled = tmp.path().join("bundled");
        fs::create_dir_all(&bundled).unwrap();
        fs::write(bundled.join("m.onnx"), b"bundled").unwrap();

        let found = resolve_in("m.onnx", None, Some(&tmp.path().join("cache")), Some(&bundled)).unwrap();
        assert_eq!(found, bundled.join("m.onnx"));
    }

    #[test]
    fn test_not_found_lists_searched_locations() {
        let tmp = TempDir::new().unwrap();
        let err = resolve_in("m.onnx", None, Some(tmp.path()), None).unwrap_err();
        match err {
            ModelResolveError::NotFound { name, searched } => {
                assert_eq!(name, "m.onnx");
                assert_eq!(searched, vec![tmp.path().join("m.onnx")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_model_cache_dir_returns_path() {
        let path = model_cache_dir().unwrap();
        assert!(path.to_string_lossy().contains("bodyflow"));
        assert!(path.ends_with("models"));
    }
}
