//! On-disk relay configuration
//!
//! The file is a JSON object with the keys `user`, `client_id`,
//! `client_secret` and `refresh_token`.

use crate::{CoreError, CoreResult};
use mailrelay_auth::CredentialRecord;
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::Path;
use tracing::info;

/// Default configuration file, relative to the working directory
pub const DEFAULT_CONFIG_PATH: &str = "mailrelay.json";

/// Load the credential record written by the configure flow
pub fn load(path: &Path) -> CoreResult<CredentialRecord> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(CoreError::ConfigMissing(path.to_path_buf()))
        }
        Err(e) => return Err(e.into()),
    };

    let record: CredentialRecord = serde_json::from_str(&contents)
        .map_err(|e| CoreError::InvalidConfig(format!("{}: {}", path.display(), e)))?;

    info!(
        "Loaded configuration for {} from {}",
        record.mailbox_identity,
        path.display()
    );
    Ok(record)
}

/// Write the credential record, readable by the owner only
pub fn save(path: &Path, record: &CredentialRecord) -> CoreResult<()> {
    let json = serde_json::to_string_pretty(record)
        .map_err(|e| CoreError::InvalidConfig(e.to_string()))?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;

    // mode only applies to new files; tighten one left by an older run
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    }

    file.write_all(json.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CredentialRecord {
        CredentialRecord {
            mailbox_identity: "alerts@example.com".to_string(),
            client_id: "id.apps.example".to_string(),
            client_secret: "secret".to_string(),
            refresh_token: "1//refresh".to_string(),
        }
    }

    #[test]
    fn test_missing_file_is_config_missing() {
        let dir = tempfile::tempdir().unwrap();
        let err = load(&dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, CoreError::ConfigMissing(_)));
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailrelay.json");

        save(&path, &record()).unwrap();
        assert_eq!(load(&path).unwrap(), record());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["user"], "alerts@example.com");
        assert_eq!(raw["refresh_token"], "1//refresh");
    }

    #[test]
    fn test_garbage_is_invalid_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mailrelay.json");
        std::fs::write(&path, "{\"user\": 42}").unwrap();

        assert!(matches!(load(&path), Err(CoreError::InvalidConfig(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let fresh = dir.path().join("fresh.json");
        save(&fresh, &record()).unwrap();
        let mode = std::fs::metadata(&fresh).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);

        let existing = dir.path().join("existing.json");
        std::fs::write(&existing, "{}").unwrap();
        std::fs::set_permissions(&existing, std::fs::Permissions::from_mode(0o644)).unwrap();
        save(&existing, &record()).unwrap();
        let mode = std::fs::metadata(&existing).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
        assert_eq!(load(&existing).unwrap(), record());
    }
}
