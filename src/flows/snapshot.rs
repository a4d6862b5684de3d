//! Persisted form of the flow store.
//!
//! The current layout is a versioned envelope:
//!
//! ```json
//! {"version":1,"directories":[{"path":"/in","flows":[{"pattern":"^a","destination":"/out"}]}]}
//! ```
//!
//! Restore also accepts a bare directory list, and the layout earlier
//! FileFlow releases wrote (`Path`/`Flows`/`Pattern` keys, destination as
//! `{"Path": ...}`).

use std::path::PathBuf;

use serde::{Deserialize, Deserializer, Serialize};

use super::error::{StoreError, StoreResult};

/// Current snapshot schema version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Serializable image of the whole store, in directory order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: u32,
    #[serde(default)]
    pub directories: Vec<DirectoryRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryRecord {
    #[serde(alias = "Path")]
    pub path: PathBuf,
    #[serde(default, alias = "Flows", deserialize_with = "nullable_vec")]
    pub flows: Vec<FlowRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowRecord {
    #[serde(alias = "Pattern")]
    pub pattern: String,
    #[serde(alias = "Destination", deserialize_with = "destination_path")]
    pub destination: PathBuf,
}

impl StoreSnapshot {
    pub fn new(directories: Vec<DirectoryRecord>) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            directories,
        }
    }

    /// Encode as JSON. Fails for paths that are not valid UTF-8.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| StoreError::CorruptState {
            reason: format!("cannot encode snapshot: {e}"),
        })
    }

    /// Decode any supported layout. Structural validation happens in the store.
    pub fn from_bytes(bytes: &[u8]) -> StoreResult<Self> {
        let value: serde_json::Value = serde_json::from_slice(bytes).map_err(corrupt)?;

        match value {
            serde_json::Value::Array(_) => {
                let directories: Vec<DirectoryRecord> =
                    serde_json::from_value(value).map_err(corrupt)?;
                Ok(Self::new(directories))
            }
            serde_json::Value::Object(_) => {
                let snapshot: StoreSnapshot = serde_json::from_value(value).map_err(corrupt)?;
                if snapshot.version != SNAPSHOT_VERSION {
                    return Err(StoreError::CorruptState {
                        reason: format!("unsupported snapshot version {}", snapshot.version),
                    });
                }
                Ok(snapshot)
            }
            serde_json::Value::Null => Ok(Self::new(Vec::new())),
            other => Err(StoreError::CorruptState {
                reason: format!("expected object or array, found {other}"),
            }),
        }
    }
}

fn corrupt(e: serde_json::Error) -> StoreError {
    StoreError::CorruptState {
        reason: e.to_string(),
    }
}

fn nullable_vec<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Ok(Option::<Vec<T>>::deserialize(deserializer)?.unwrap_or_default())
}

fn destination_path<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Destination {
        Plain(PathBuf),
        Nested {
            #[serde(alias = "Path")]
            path: PathBuf,
        },
    }

    Ok(match Destination::deserialize(deserializer)? {
        Destination::Plain(path) => path,
        Destination::Nested { path } => path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_layout() {
        let snapshot = StoreSnapshot::new(vec![DirectoryRecord {
            path: PathBuf::from("/in"),
            flows: vec![FlowRecord {
                pattern: "^a".to_string(),
                destination: PathBuf::from("/out"),
            }],
        }]);

        let json: serde_json::Value = serde_json::from_slice(&snapshot.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], 1);
        assert_eq!(json["directories"][0]["path"], "/in");
        assert_eq!(json["directories"][0]["flows"][0]["pattern"], "^a");
        assert_eq!(json["directories"][0]["flows"][0]["destination"], "/out");
    }

    #[test]
    fn test_bare_list_layout() {
        let bytes = br#"[{"path":"/in","flows":[{"pattern":"x","destination":"/out"}]}]"#;
        let snapshot = StoreSnapshot::from_bytes(bytes).unwrap();
        assert_eq!(snapshot.directories.len(), 1);
        assert_eq!(snapshot.directories[0].flows[0].destination, PathBuf::from("/out"));
    }

    #[test]
    fn test_legacy_layout() {
        let bytes = br#"[
            {"Path":"/downloads","Flows":[{"Pattern":"\\.pdf$","Destination":{"Path":"/docs"}}]},
            {"Path":"/desktop","Flows":null}
        ]"#;
        let snapshot = StoreSnapshot::from_bytes(bytes).unwrap();
        assert_eq!(snapshot.directories.len(), 2);
        assert_eq!(snapshot.directories[0].path, PathBuf::from("/downloads"));
        assert_eq!(snapshot.directories[0].flows[0].pattern, r"\.pdf$");
        assert_eq!(snapshot.directories[0].flows[0].destination, PathBuf::from("/docs"));
        assert!(snapshot.directories[1].flows.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_path_fails_to_encode() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let snapshot = StoreSnapshot::new(vec![DirectoryRecord {
            path: PathBuf::from(OsStr::from_bytes(b"/in\xff")),
            flows: Vec::new(),
        }]);
        assert!(matches!(
            snapshot.to_bytes(),
            Err(StoreError::CorruptState { .. })
        ));
    }

    #[test]
    fn test_unknown_version_is_corrupt() {
        let err = StoreSnapshot::from_bytes(br#"{"version":7,"directories":[]}"#).unwrap_err();
        assert!(matches!(err, StoreError::CorruptState { .. }));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        let cases: [&[u8]; 3] = [b"{not json", b"42", b"\"text\""];
        for bytes in cases {
            let err = StoreSnapshot::from_bytes(bytes).unwrap_err();
            assert!(matches!(err, StoreError::CorruptState { .. }), "{bytes:?}");
        }
    }
}
