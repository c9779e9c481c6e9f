use crate::error::{Error, Result};
use crate::models::Settings;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const CURRENT_SETTINGS_VERSION: u32 = 1;
const SETTINGS_FILE_NAME: &str = "config.json";
const APP_DIR_NAME: &str = "KeyCount";

// Files written before versioning carry no `version` field.
fn default_settings_version() -> u32 {
    0
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedSettings {
    #[serde(default = "default_settings_version")]
    version: u32,
    #[serde(default)]
    settings: Settings,
}

/// `~/Library/Application Support/KeyCount` on macOS.
pub fn default_data_dir() -> Result<PathBuf> {
    dirs::data_dir()
        .map(|dir| dir.join(APP_DIR_NAME))
        .ok_or(Error::NoDataDir)
}

pub fn settings_path(dir: &Path) -> PathBuf {
    dir.join(SETTINGS_FILE_NAME)
}

pub fn load(path: &Path) -> Result<Option<Settings>> {
    if !path.exists() {
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let mut state: PersistedSettings = serde_json::from_slice(&bytes)?;

    // Best-effort upgrade; an unwritable file must not block startup.
    if state.version < CURRENT_SETTINGS_VERSION {
        state.version = CURRENT_SETTINGS_VERSION;
        if let Err(e) = write_atomically(path, &state) {
            tracing::warn!(path = %path.display(), error = %e, "failed to upgrade settings file");
        }
    }

    Ok(Some(state.settings))
}

pub fn save(path: &Path, settings: &Settings) -> Result<()> {
    write_atomically(
        path,
        &PersistedSettings {
            version: CURRENT_SETTINGS_VERSION,
            settings: settings.clone(),
        },
    )
}

/// Where an unparseable settings file is moved before defaults replace it.
pub fn corrupt_settings_path(path: &Path) -> PathBuf {
    path.with_extension("json.corrupt")
}

/// Loads `config.json` from `dir`, writing the defaults there on first run.
///
/// A file that no longer parses is moved aside to `config.json.corrupt` and replaced
/// with defaults.
pub fn load_or_init(dir: &Path) -> Result<Settings> {
    let path = settings_path(dir);
    match load(&path) {
        Ok(Some(settings)) => return Ok(settings),
        Ok(None) => {}
        Err(Error::Config(e)) => {
            let aside = corrupt_settings_path(&path);
            tracing::warn!(
                path = %path.display(),
                moved_to = %aside.display(),
                error = %e,
                "settings file is corrupt, using defaults"
            );
            if let Err(e) = fs::rename(&path, &aside) {
                tracing::warn!(error = %e, "failed to move corrupt settings file aside");
            }
        }
        Err(e) => return Err(e),
    }

    let settings = Settings::default();
    save(&path, &settings)?;
    Ok(settings)
}

fn write_atomically(path: &Path, state: &PersistedSettings) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp)?;
    serde_json::to_writer_pretty(&mut file, state)?;
    file.write_all(b"\n")?;
    file.sync_all()?;

    fs::rename(tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeRange;

    #[test]
    fn first_run_writes_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let settings = load_or_init(dir.path()).expect("init");
        assert_eq!(settings, Settings::default());
        assert!(settings_path(dir.path()).exists());
    }

    #[test]
    fn saved_settings_are_loaded_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        let settings = Settings {
            retain_days: Some(30),
            default_range: TimeRange::AllTime,
            ..Settings::default()
        };
        save(&path, &settings).expect("save");

        let loaded = load_or_init(dir.path()).expect("load");
        assert_eq!(loaded, settings);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn unversioned_file_is_upgraded_in_place() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        fs::write(&path, r#"{ "settings": { "top_n": 5 } }"#).expect("write");

        let loaded = load(&path).expect("load").expect("present");
        assert_eq!(loaded.top_n, Some(5));

        let raw = fs::read_to_string(&path).expect("read");
        assert!(raw.contains("\"version\": 1"));
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        fs::write(&path, "not json").expect("write");
        assert!(matches!(load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn corrupt_file_is_replaced_with_defaults() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = settings_path(dir.path());
        fs::write(&path, "{ truncated").expect("write");

        let settings = load_or_init(dir.path()).expect("fallback");
        assert_eq!(settings, Settings::default());

        let aside = corrupt_settings_path(&path);
        assert_eq!(fs::read_to_string(aside).expect("aside"), "{ truncated");
        assert_eq!(load(&path).expect("load"), Some(Settings::default()));
    }
}
