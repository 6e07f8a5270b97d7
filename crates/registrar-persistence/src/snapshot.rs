//! ---
//! reg_section: "03-persistence-logging"
//! reg_subsection: "module"
//! reg_type: "source"
//! reg_scope: "code"
//! reg_description: "Persistence abstractions and storage bindings."
//! reg_version: "v0.1.0-alpha"
//! reg_owner: "tbd"
//! ---
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{PersistenceError, Result};

/// Current snapshot envelope version.
pub const SNAPSHOT_VERSION: u16 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope<T> {
    version: u16,
    created_at: DateTime<Utc>,
    hash: String,
    state: T,
}

/// Persist `state` to `path` inside a versioned, hash-stamped envelope.
///
/// The envelope is written to a sibling temporary file and renamed into place,
/// so readers never observe a half-written catalog.
pub fn save_snapshot<T: Serialize>(state: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let envelope = SnapshotEnvelope {
        version: SNAPSHOT_VERSION,
        created_at: Utc::now(),
        hash: compute_hash(state)?,
        state,
    };

    let staging = staging_path(path);
    {
        let mut writer = BufWriter::new(File::create(&staging)?);
        serde_json::to_writer_pretty(&mut writer, &envelope)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    fs::rename(&staging, path)?;
    Ok(())
}

/// Load a snapshot from disk, verifying version and content hash.
pub fn load_snapshot<T: Serialize + DeserializeOwned>(path: &Path) -> Result<T> {
    let envelope: SnapshotEnvelope<T> = load_envelope(path)?;
    if envelope.version != SNAPSHOT_VERSION {
        return Err(PersistenceError::UnsupportedVersion {
            found: envelope.version,
            expected: SNAPSHOT_VERSION,
        });
    }
    if compute_hash(&envelope.state)? != envelope.hash {
        return Err(PersistenceError::HashMismatch);
    }
    Ok(envelope.state)
}

/// Verify the integrity of a snapshot without interpreting its payload.
pub fn verify_snapshot(path: &Path) -> bool {
    match load_envelope::<serde_json::Value>(path) {
        Ok(envelope) => compute_hash(&envelope.state)
            .map(|hash| hash == envelope.hash)
            .unwrap_or(false),
        Err(_) => false,
    }
}

fn load_envelope<T: DeserializeOwned>(path: &Path) -> Result<SnapshotEnvelope<T>> {
    let mut file = File::open(path)?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn compute_hash<T: Serialize + ?Sized>(state: &T) -> Result<String> {
    // Hash the canonical value form so typed and untyped readers agree.
    let canonical = serde_json::to_value(state)?;
    let serialized = serde_json::to_vec(&canonical)?;
    let mut hasher = Sha256::new();
    hasher.update(serialized);
    Ok(hex::encode(hasher.finalize()))
}

pub(crate) fn staging_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Catalog {
        courses: Vec<String>,
        seats: u32,
    }

    #[test]
    fn save_and_load_typed_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        let catalog = Catalog {
            courses: vec!["COMP308".into(), "COMP229".into()],
            seats: 40,
        };

        save_snapshot(&catalog, &path).unwrap();
        assert!(verify_snapshot(&path));
        assert!(!dir.path().join("catalog.json.tmp").exists());

        let loaded: Catalog = load_snapshot(&path).unwrap();
        assert_eq!(loaded, catalog);
    }

    #[test]
    fn verify_rejects_tampered_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        save_snapshot(
            &Catalog {
                courses: vec!["COMP308".into()],
                seats: 1,
            },
            &path,
        )
        .unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["state"]["seats"] = json!(999);
        fs::write(&path, serde_json::to_vec_pretty(&envelope).unwrap()).unwrap();

        assert!(!verify_snapshot(&path));
        assert!(matches!(
            load_snapshot::<Catalog>(&path),
            Err(PersistenceError::HashMismatch)
        ));
    }

    #[test]
    fn newer_version_is_refused() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("catalog.json");
        save_snapshot(&json!({"courses": [], "seats": 0}), &path).unwrap();

        let mut envelope: serde_json::Value =
            serde_json::from_reader(File::open(&path).unwrap()).unwrap();
        envelope["version"] = json!(2);
        fs::write(&path, serde_json::to_vec(&envelope).unwrap()).unwrap();

        assert!(matches!(
            load_snapshot::<Catalog>(&path),
            Err(PersistenceError::UnsupportedVersion { found: 2, .. })
        ));
    }
}
