use std::path::PathBuf;

use anyhow::anyhow;

use crate::models::settings::AppSettings;

fn settings_path() -> anyhow::Result<PathBuf> {
    let config_dir =
        dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
    Ok(config_dir.join("mediagrab").join("settings.json"))
}

/// Missing or corrupt settings files fall back to defaults; settings are
/// never a reason to refuse to run.
pub async fn load_settings() -> AppSettings {
    match settings_path() {
        Ok(path) => load_settings_from(&path).await,
        Err(_) => AppSettings::default(),
    }
}

pub async fn save_settings(settings: &AppSettings) -> anyhow::Result<()> {
    save_settings_to(&settings_path()?, settings).await
}

async fn load_settings_from(path: &PathBuf) -> AppSettings {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => serde_json::from_str(&json).unwrap_or_default(),
        Err(_) => AppSettings::default(),
    }
}

async fn save_settings_to(path: &PathBuf, settings: &AppSettings) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(path, json).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_through_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");

        let mut settings = AppSettings::default();
        settings.extraction.max_scroll_attempts = 42;
        save_settings_to(&path, &settings).await.unwrap();

        let loaded = load_settings_from(&path).await;
        assert_eq!(loaded.extraction.max_scroll_attempts, 42);
    }

    #[tokio::test]
    async fn missing_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let loaded = load_settings_from(&tmp.path().join("absent.json")).await;
        assert_eq!(loaded.extraction.max_scroll_attempts, 15);
    }

    #[tokio::test]
    async fn corrupt_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        tokio::fs::write(&path, "{not json").await.unwrap();
        let loaded = load_settings_from(&path).await;
        assert_eq!(loaded.schema_version, 1);
    }
}
