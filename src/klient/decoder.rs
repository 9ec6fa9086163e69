use std::path::Path;

use ::kube::api::DynamicObject;
use serde::Deserialize;

use crate::error::{Error, Result};

/// Decode every object in a (possibly multi-document) YAML or JSON manifest.
///
/// Empty documents are skipped. Each object must carry `apiVersion` and
/// `kind`.
///
/// # Errors
///
/// Returns [`Error::Decode`] naming the 1-based document index that failed.
pub fn decode_all(manifest: &str) -> Result<Vec<DynamicObject>> {
    let mut objects = Vec::new();
    for (index, document) in serde_yaml::Deserializer::from_str(manifest).enumerate() {
        let value = serde_yaml::Value::deserialize(document)
            .map_err(|e| Error::Decode(format!("document {}: {e}", index + 1)))?;
        if value.is_null() {
            continue;
        }
        let object: DynamicObject = serde_yaml::from_value(value)
            .map_err(|e| Error::Decode(format!("document {}: {e}", index + 1)))?;
        if object.types.is_none() {
            return Err(Error::Decode(format!(
                "document {}: missing apiVersion or kind",
                index + 1
            )));
        }
        objects.push(object);
    }
    Ok(objects)
}

/// Read and decode a manifest file.
pub fn decode_file(path: &Path) -> Result<Vec<DynamicObject>> {
    let manifest = std::fs::read_to_string(path).map_err(|source| Error::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_all(&manifest)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MANIFEST: &str = r#"
apiVersion: v1
kind: Namespace
metadata:
  name: e2e
---
# comment-only document
---
apiVersion: apps/v1
kind: Deployment
metadata:
  name: web
  namespace: e2e
spec:
  replicas: 2
"#;

    #[test]
    fn decode_all_reads_every_document() {
        let objects = decode_all(MANIFEST).unwrap();
        assert_eq!(objects.len(), 2);
        assert_eq!(objects[0].types.as_ref().unwrap().kind, "Namespace");
        assert_eq!(objects[1].metadata.namespace.as_deref(), Some("e2e"));
        assert_eq!(objects[1].data["spec"]["replicas"], 2);
    }

    #[test]
    fn decode_all_accepts_json() {
        let objects =
            decode_all(r#"{"apiVersion":"v1","kind":"ConfigMap","metadata":{"name":"c"}}"#)
                .unwrap();
        assert_eq!(objects.len(), 1);
    }

    #[test]
    fn decode_all_rejects_untyped_objects() {
        let err = decode_all("metadata:\n  name: x\n").unwrap_err();
        assert!(err.to_string().contains("document 1"));
    }

    #[test]
    fn decode_file_reports_missing_path() {
        let err = decode_file(Path::new("/definitely/not/here.yaml")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn decode_file_reads_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("manifest.yaml");
        std::fs::write(&path, MANIFEST).unwrap();
        assert_eq!(decode_file(&path).unwrap().len(), 2);
    }
}
