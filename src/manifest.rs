//! Training manifest generation.
//!
//! A template manifest holds one JSON record per image with paths relative
//! to the dataset root. Rewriting prefixes those paths with the remote
//! location the dataset is uploaded to, so the result can be handed
//! straight to dataset creation.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SOURCE_REF: &str = "source-ref";
pub const ANOMALY_MASK_REF: &str = "anomaly-mask-ref";

pub const TEMPLATE_MANIFEST_LOCATION: &str = "manifests/template.manifest";
pub const TRAIN_MANIFEST_LOCATION: &str = "manifests/train.manifest";

#[derive(Debug, Error)]
pub enum RecordError {
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("record is not a JSON object")]
    NotAnObject,
    #[error("missing required key `source-ref`")]
    MissingSourceRef,
    #[error("key `{0}` must be a string")]
    NotAString(&'static str),
}

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("couldn't open file: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("malformed record on line {line}: {reason}")]
    MalformedRecord {
        line: usize,
        #[source]
        reason: RecordError,
    },
    #[error("manifest I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One line of a manifest. Keys other than the two path references are
/// carried through untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct ManifestRecord {
    fields: Map<String, Value>,
}

impl ManifestRecord {
    pub fn parse(line: &str) -> Result<Self, RecordError> {
        let value: Value = serde_json::from_str(line)?;
        let Value::Object(fields) = value else {
            return Err(RecordError::NotAnObject);
        };

        match fields.get(SOURCE_REF) {
            None => return Err(RecordError::MissingSourceRef),
            Some(Value::String(_)) => {}
            Some(_) => return Err(RecordError::NotAString(SOURCE_REF)),
        }
        if let Some(mask_ref) = fields.get(ANOMALY_MASK_REF)
            && !mask_ref.is_string()
        {
            return Err(RecordError::NotAString(ANOMALY_MASK_REF));
        }

        Ok(Self { fields })
    }

    pub fn source_ref(&self) -> &str {
        self.fields
            .get(SOURCE_REF)
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn anomaly_mask_ref(&self) -> Option<&str> {
        self.fields.get(ANOMALY_MASK_REF).and_then(Value::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Prefix both path references. `prefix` is used verbatim; callers that
    /// take user input should pass it through [`normalize_prefix`] first.
    pub fn with_prefix(mut self, prefix: &str) -> Self {
        for key in [SOURCE_REF, ANOMALY_MASK_REF] {
            if let Some(Value::String(path)) = self.fields.get_mut(key) {
                path.insert_str(0, prefix);
            }
        }
        self
    }

    pub fn to_line(&self) -> String {
        // A map of JSON values always serializes.
        Value::Object(self.fields.clone()).to_string()
    }
}

/// Append a trailing `/` when missing.
pub fn normalize_prefix(remote_prefix: &str) -> String {
    if remote_prefix.ends_with('/') {
        remote_prefix.to_string()
    } else {
        format!("{}/", remote_prefix)
    }
}

/// Where the training manifest ends up once the dataset is uploaded.
pub fn manifest_location(remote_prefix: &str, layout: &DatasetLayout) -> String {
    let relative = layout
        .train_manifest
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/");
    normalize_prefix(remote_prefix) + &relative
}

/// Rewrite `template_path` into `destination_path`, returning the number of
/// records written. The destination is truncated up front and left as-is
/// on failure.
pub fn rewrite(
    template_path: &Path,
    destination_path: &Path,
    remote_prefix: &str,
) -> Result<usize, ManifestError> {
    let prefix = normalize_prefix(remote_prefix);

    let template = match File::open(template_path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            return Err(ManifestError::FileNotFound(template_path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };

    tracing::info!("Creating manifest file from {}", template_path.display());
    tracing::info!("Destination: {}", prefix);

    let mut out = BufWriter::new(File::create(destination_path)?);
    let mut written = 0;

    for (index, line) in BufReader::new(template).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }

        let record = ManifestRecord::parse(&line)
            .map_err(|reason| ManifestError::MalformedRecord {
                line: index + 1,
                reason,
            })?
            .with_prefix(&prefix);

        let output = record.to_line();
        writeln!(out, "{}", output)?;
        tracing::debug!("Writing json line: {}", output);
        written += 1;
    }

    out.flush()?;
    tracing::info!("Wrote {} JSON Lines.", written);
    Ok(written)
}

/// Relative locations of the manifests inside a dataset directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatasetLayout {
    pub template_manifest: PathBuf,
    pub train_manifest: PathBuf,
}

impl Default for DatasetLayout {
    fn default() -> Self {
        Self {
            template_manifest: PathBuf::from(TEMPLATE_MANIFEST_LOCATION),
            train_manifest: PathBuf::from(TRAIN_MANIFEST_LOCATION),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSummary {
    pub destination: PathBuf,
    pub records: usize,
}

pub fn create_train_manifest(
    dataset_dir: &Path,
    remote_prefix: &str,
    layout: &DatasetLayout,
) -> Result<ManifestSummary, ManifestError> {
    let template = dataset_dir.join(&layout.template_manifest);
    let destination = dataset_dir.join(&layout.train_manifest);

    let records = rewrite(&template, &destination, remote_prefix)?;
    tracing::info!(
        "Finished: training manifest file name: {}",
        destination.display()
    );

    Ok(ManifestSummary {
        destination,
        records,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;
    use tempfile::TempDir;

    fn write_template(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("template.manifest");
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn normalize_prefix_appends_slash_once() {
        assert_eq!(normalize_prefix("s3://bucket/data"), "s3://bucket/data/");
        assert_eq!(normalize_prefix("s3://bucket/data/"), "s3://bucket/data/");
        assert_eq!(normalize_prefix(""), "/");
    }

    #[test]
    fn manifest_location_points_at_train_manifest() {
        assert_eq!(
            manifest_location("s3://bucket/cookies", &DatasetLayout::default()),
            "s3://bucket/cookies/manifests/train.manifest"
        );
        let layout = DatasetLayout {
            train_manifest: PathBuf::from("out/train.jsonl"),
            ..DatasetLayout::default()
        };
        assert_eq!(
            manifest_location("s3://bucket/cookies/", &layout),
            "s3://bucket/cookies/out/train.jsonl"
        );
    }

    #[test]
    fn parse_requires_source_ref() {
        assert!(matches!(
            ManifestRecord::parse(r#"{"class": 1}"#),
            Err(RecordError::MissingSourceRef)
        ));
        assert!(matches!(
            ManifestRecord::parse(r#"{"source-ref": 3}"#),
            Err(RecordError::NotAString(SOURCE_REF))
        ));
        assert!(matches!(
            ManifestRecord::parse(r#"{"source-ref": "a.jpg", "anomaly-mask-ref": null}"#),
            Err(RecordError::NotAString(ANOMALY_MASK_REF))
        ));
        assert!(matches!(
            ManifestRecord::parse("[1, 2]"),
            Err(RecordError::NotAnObject)
        ));
        assert!(matches!(
            ManifestRecord::parse("{not json"),
            Err(RecordError::InvalidJson(_))
        ));
    }

    #[test]
    fn with_prefix_rewrites_only_path_keys() {
        let record = ManifestRecord::parse(
            r#"{"source-ref": "train/normal/1.jpg", "anomaly-label": 0, "meta": {"source-ref": "x"}}"#,
        )
        .unwrap()
        .with_prefix("s3://b/p/");

        assert_eq!(record.source_ref(), "s3://b/p/train/normal/1.jpg");
        assert_eq!(record.anomaly_mask_ref(), None);
        assert_eq!(record.get("anomaly-label"), Some(&json!(0)));
        assert_eq!(record.get("meta"), Some(&json!({"source-ref": "x"})));
    }

    #[test]
    fn with_prefix_rewrites_mask_ref_when_present() {
        let record =
            ManifestRecord::parse(r#"{"source-ref": "img.jpg", "anomaly-mask-ref": "mask.png"}"#)
                .unwrap()
                .with_prefix("s3://b/");
        assert_eq!(record.source_ref(), "s3://b/img.jpg");
        assert_eq!(record.anomaly_mask_ref(), Some("s3://b/mask.png"));
    }

    #[test]
    fn rewrite_skips_blank_lines_and_counts_records() {
        let dir = TempDir::new().unwrap();
        let template = write_template(
            &dir,
            "{\"source-ref\": \"a.jpg\"}\n\n   \n{\"source-ref\": \"b.jpg\"}\n",
        );
        let out = dir.path().join("train.manifest");

        let written = rewrite(&template, &out, "s3://bucket/ds").unwrap();
        assert_eq!(written, 2);

        let content = fs::read_to_string(&out).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(content.ends_with('\n'));
        assert_eq!(
            ManifestRecord::parse(lines[1]).unwrap().source_ref(),
            "s3://bucket/ds/b.jpg"
        );
    }

    #[test]
    fn rewrite_reports_missing_template() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope.manifest");
        let err = rewrite(&missing, &dir.path().join("out"), "s3://b").unwrap_err();
        match err {
            ManifestError::FileNotFound(path) => assert_eq!(path, missing),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn rewrite_reports_file_line_of_bad_record() {
        let dir = TempDir::new().unwrap();
        let template = write_template(
            &dir,
            "{\"source-ref\": \"a.jpg\"}\n\n{\"anomaly-mask-ref\": \"m.png\"}\n",
        );
        let err = rewrite(&template, &dir.path().join("out"), "s3://b").unwrap_err();
        assert!(matches!(
            err,
            ManifestError::MalformedRecord {
                line: 3,
                reason: RecordError::MissingSourceRef
            }
        ));
        assert_eq!(
            err.to_string(),
            "malformed record on line 3: missing required key `source-ref`"
        );
    }

    #[test]
    fn create_train_manifest_uses_layout() {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("manifests")).unwrap();
        fs::write(
            dir.path().join(TEMPLATE_MANIFEST_LOCATION),
            "{\"source-ref\": \"train/anomaly/1.jpg\", \"anomaly-mask-ref\": \"train/mask/1.png\"}\n",
        )
        .unwrap();

        let summary =
            create_train_manifest(dir.path(), "s3://bucket", &DatasetLayout::default()).unwrap();
        assert_eq!(summary.records, 1);
        assert_eq!(summary.destination, dir.path().join(TRAIN_MANIFEST_LOCATION));

        let line = fs::read_to_string(&summary.destination).unwrap();
        let record = ManifestRecord::parse(line.trim_end()).unwrap();
        assert_eq!(record.anomaly_mask_ref(), Some("s3://bucket/train/mask/1.png"));
    }
}
