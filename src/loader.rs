use crate::config::{ColumnMapping, MANIFEST_FILE};
use crate::engine::DatasetView;
use crate::error::LoadError;
use crate::normalize::{normalize_counted, FallbackCounts};
use crate::types::Record;
use bytes::Bytes;
use csv::ReaderBuilder;
use log::{debug, info, warn};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::record::Field;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub files: usize,
    pub total_rows: usize,
    pub parse_errors: usize,
    pub fallbacks: FallbackCounts,
}

/// Where the manifest and the data files live. Both variants resolve files
/// as `<root>/<data_path>/<file name>`.
#[derive(Debug, Clone)]
pub enum DataSource {
    Http {
        client: reqwest::Client,
        origin: String,
        data_path: String,
    },
    Local {
        root: PathBuf,
        data_path: String,
    },
}

impl DataSource {
    /// `http://` and `https://` roots select the HTTP source, anything else
    /// is a local directory.
    pub fn from_root(root: &str, data_path: &str) -> Self {
        let data_path = data_path.trim_matches('/').to_string();
        if root.starts_with("http://") || root.starts_with("https://") {
            DataSource::Http {
                client: reqwest::Client::new(),
                origin: root.trim_end_matches('/').to_string(),
                data_path,
            }
        } else {
            DataSource::Local {
                root: PathBuf::from(root),
                data_path,
            }
        }
    }

    /// URL or path of one file relative to the data folder.
    pub fn location(&self, file: &str) -> String {
        match self {
            DataSource::Http { origin, data_path, .. } => {
                format!("{}/{}/{}", origin, data_path, file.trim_start_matches('/'))
            }
            DataSource::Local { .. } => self.local_path(file).display().to_string(),
        }
    }

    fn local_path(&self, file: &str) -> PathBuf {
        match self {
            DataSource::Local { root, data_path } => {
                let mut path = root.join(data_path);
                for part in file.split('/').filter(|p| !p.is_empty()) {
                    path.push(part);
                }
                path
            }
            DataSource::Http { .. } => PathBuf::from(file),
        }
    }

    async fn fetch(&self, file: &str) -> Result<Bytes, String> {
        match self {
            DataSource::Http { client, .. } => {
                let response = client
                    .get(self.location(file))
                    .send()
                    .await
                    .map_err(|e| e.to_string())?;
                let status = response.status();
                if !status.is_success() {
                    return Err(format!("HTTP {}", status));
                }
                response.bytes().await.map_err(|e| e.to_string())
            }
            DataSource::Local { .. } => tokio::fs::read(self.local_path(file))
                .await
                .map(Bytes::from)
                .map_err(|e| e.to_string()),
        }
    }

    /// Fetch `data-manifest.json`: a JSON list of file names. Fails fast on
    /// an unreachable manifest or a non-success status.
    pub async fn list_files(&self) -> Result<Vec<String>, LoadError> {
        let url = self.location(MANIFEST_FILE);
        let body = self
            .fetch(MANIFEST_FILE)
            .await
            .map_err(|reason| LoadError::ManifestUnreachable {
                url: url.clone(),
                reason,
            })?;
        let files: Vec<String> =
            serde_json::from_slice(&body).map_err(|e| LoadError::ManifestMalformed {
                url: url.clone(),
                reason: e.to_string(),
            })?;
        info!("manifest {} lists {} files", url, files.len());
        Ok(files)
    }
}

enum FileKind {
    Parquet,
    Csv,
}

fn file_kind(file: &str) -> Result<FileKind, LoadError> {
    let ext = Path::new(file)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match ext.as_deref() {
        Some("parquet") => Ok(FileKind::Parquet),
        Some("csv") => Ok(FileKind::Csv),
        _ => Err(LoadError::UnsupportedFormat {
            file: file.to_string(),
        }),
    }
}

fn field_to_value(field: &Field) -> Value {
    match field {
        Field::Null => Value::Null,
        Field::Bool(b) => Value::Bool(*b),
        Field::Byte(n) => Value::from(*n),
        Field::Short(n) => Value::from(*n),
        Field::Int(n) => Value::from(*n),
        Field::Long(n) => Value::from(*n),
        Field::UByte(n) => Value::from(*n),
        Field::UShort(n) => Value::from(*n),
        Field::UInt(n) => Value::from(*n),
        Field::ULong(n) => Value::from(*n),
        Field::Float(n) => serde_json::Number::from_f64(f64::from(*n))
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::Double(n) => serde_json::Number::from_f64(*n)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        Field::Str(s) => Value::String(s.clone()),
        // Decimals, dates and nested values reach the normalizer as text.
        other => Value::String(other.to_string()),
    }
}

/// Rows of one file as raw key/value records keyed by canonical column.
/// Returns the rows and the number of undecodable rows skipped.
pub fn decode_file(
    file: &str,
    data: Bytes,
    mapping: &ColumnMapping,
) -> Result<(Vec<Map<String, Value>>, usize), LoadError> {
    let decode_err = |reason: String| LoadError::FileDecode {
        file: file.to_string(),
        reason,
    };
    match file_kind(file)? {
        FileKind::Parquet => {
            let reader = SerializedFileReader::new(data).map_err(|e| decode_err(e.to_string()))?;
            let rows = reader
                .get_row_iter(None)
                .map_err(|e| decode_err(e.to_string()))?;
            let mut out = Vec::new();
            for row in rows {
                let row = row.map_err(|e| decode_err(e.to_string()))?;
                let mut raw = Map::new();
                for (name, field) in row.get_column_iter() {
                    if let Some(key) = mapping.canonical(name) {
                        raw.insert(key.to_string(), field_to_value(field));
                    }
                }
                out.push(raw);
            }
            Ok((out, 0))
        }
        FileKind::Csv => {
            let mut rdr = ReaderBuilder::new().flexible(true).from_reader(&data[..]);
            let headers: Vec<Option<&'static str>> = rdr
                .headers()
                .map_err(|e| decode_err(e.to_string()))?
                .iter()
                .map(|h| mapping.canonical(h.trim_start_matches('\u{feff}')))
                .collect();
            let mut out = Vec::new();
            let mut parse_errors = 0usize;
            for result in rdr.records() {
                let record = match result {
                    Ok(r) => r,
                    Err(e) => {
                        debug!("{}: skipping unreadable row: {}", file, e);
                        parse_errors += 1;
                        continue;
                    }
                };
                let mut raw = Map::new();
                for (key, value) in headers.iter().zip(record.iter()) {
                    if let Some(key) = key {
                        // Empty CSV cells are missing values, not empty strings.
                        let value = if value.is_empty() {
                            Value::Null
                        } else {
                            Value::String(value.to_string())
                        };
                        raw.insert(key.to_string(), value);
                    }
                }
                out.push(raw);
            }
            Ok((out, parse_errors))
        }
    }
}

/// Fetch every file, normalize its rows and build the canonical view.
///
/// An empty file list is not an error: it yields an empty, loaded view.
pub async fn load_view(
    source: &DataSource,
    files: &[String],
    mapping: &ColumnMapping,
) -> Result<(DatasetView, LoadReport), LoadError> {
    let mut report = LoadReport::default();
    let mut records: Vec<Record> = Vec::new();

    for file in files {
        let data = source
            .fetch(file)
            .await
            .map_err(|reason| LoadError::FileFetch {
                file: source.location(file),
                reason,
            })?;
        let name = file.clone();
        let columns = mapping.clone();
        let (rows, parse_errors) =
            tokio::task::spawn_blocking(move || decode_file(&name, data, &columns))
                .await
                .map_err(|e| LoadError::Interrupted(e.to_string()))??;

        let mut fallbacks = FallbackCounts::default();
        for (i, raw) in rows.iter().enumerate() {
            records.push(normalize_counted(raw, &format!("{}#{}", file, i), &mut fallbacks));
        }
        info!("{}: {} rows", file, rows.len());
        if parse_errors > 0 {
            warn!("{}: {} unreadable rows skipped", file, parse_errors);
        }
        if fallbacks.total() > 0 {
            debug!("{}: {:?} fields defaulted", file, fallbacks);
        }

        report.files += 1;
        report.total_rows += rows.len();
        report.parse_errors += parse_errors;
        report.fallbacks.merge(&fallbacks);
    }

    Ok((DatasetView::new(records), report))
}
