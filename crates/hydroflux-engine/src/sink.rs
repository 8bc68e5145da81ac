//! Record-file backends.
//!
//! One file per (component, variable): a metadata header followed by one row
//! per completed aggregation window. Rows carry their window and method, so
//! several windows of the same variable share the file. The NetCDF writer of
//! the original system is an external collaborator; these backends implement
//! the same trait seam in portable formats.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use hydroflux_common::{AggregationMethod, IoError};

/// Metadata written once at the head of every record file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordMeta {
    pub identifier: String,
    pub component: String,
    pub variable: String,
    pub units: String,
    pub methods: Vec<AggregationMethod>,
}

/// One completed aggregation window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordRow {
    /// Seconds-since-reference of the window end.
    pub end_seconds: i64,
    /// ISO rendering of the window end.
    pub end_time: String,
    pub window_seconds: i64,
    pub method: AggregationMethod,
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Where completed windows go. A slice append is atomic: either every row of
/// the slice is durable or the write fails and the simulation aborts.
pub trait RecordSink: Send {
    fn append(&mut self, rows: &[RecordRow]) -> Result<(), IoError>;

    /// Rows written so far (header excluded).
    fn rows_written(&self) -> u64;

    /// Drops every row past `keep`, for resume from a dump.
    fn truncate(&mut self, keep: u64) -> Result<(), IoError>;

    /// Flushes file-system buffers; called once when the run closes.
    fn sync(&mut self) -> Result<(), IoError>;

    fn path(&self) -> &Path;
}

/// Picks a backend from the file extension (`.csv`, else JSON lines).
pub fn sink_for_path(path: PathBuf, meta: RecordMeta) -> Result<Box<dyn RecordSink>, IoError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => Ok(Box::new(CsvSink::create(path, meta)?)),
        _ => Ok(Box::new(JsonLinesSink::create(path, meta)?)),
    }
}

/// Reopens an existing record file in append mode (resume path); the row
/// count is recovered from the file itself.
pub fn reopen_for_path(path: PathBuf) -> Result<Box<dyn RecordSink>, IoError> {
    let header_lines = match path.extension().and_then(|e| e.to_str()) {
        Some("csv") => 2,
        _ => 1,
    };
    let text = fs::read_to_string(&path).map_err(|e| IoError::file("read", &path, e))?;
    let rows = text.lines().count().saturating_sub(header_lines) as u64;
    let file = OpenOptions::new()
        .append(true)
        .open(&path)
        .map_err(|e| IoError::file("open", &path, e))?;
    Ok(match header_lines {
        2 => Box::new(CsvSink { path, file, rows }),
        _ => Box::new(JsonLinesSink { path, file, rows }),
    })
}

/* ───────────────────────────── JSON lines ─────────────────────────────── */

/// One JSON object per line; the first line is the metadata header.
pub struct JsonLinesSink {
    path: PathBuf,
    file: File,
    rows: u64,
}

impl JsonLinesSink {
    pub fn create(path: PathBuf, meta: RecordMeta) -> Result<Self, IoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| IoError::file("create", parent, e))?;
        }
        let mut file = File::create(&path).map_err(|e| IoError::file("create", &path, e))?;
        let header = serde_json::to_string(&meta).map_err(|e| IoError::Encode {
            what: format!("record metadata for '{}'", meta.variable),
            reason: e.to_string(),
        })?;
        writeln!(file, "{header}").map_err(|e| IoError::file("write", &path, e))?;
        Ok(Self {
            path,
            file,
            rows: 0,
        })
    }

    /// Reads back the rows of a closed file (test and resume tooling).
    pub fn read(path: &Path) -> Result<(RecordMeta, Vec<RecordRow>), IoError> {
        let file = File::open(path).map_err(|e| IoError::file("open", path, e))?;
        let mut lines = BufReader::new(file).lines();
        let header = lines
            .next()
            .transpose()
            .map_err(|e| IoError::file("read", path, e))?
            .ok_or_else(|| IoError::Decode {
                path: path.to_path_buf(),
                reason: "empty record file".to_string(),
            })?;
        let meta = serde_json::from_str(&header).map_err(|e| IoError::Decode {
            path: path.to_path_buf(),
            reason: format!("bad header: {e}"),
        })?;
        let mut rows = Vec::new();
        for line in lines {
            let line = line.map_err(|e| IoError::file("read", path, e))?;
            if line.trim().is_empty() {
                continue;
            }
            rows.push(serde_json::from_str(&line).map_err(|e| IoError::Decode {
                path: path.to_path_buf(),
                reason: format!("bad row: {e}"),
            })?);
        }
        Ok((meta, rows))
    }
}

impl RecordSink for JsonLinesSink {
    fn append(&mut self, rows: &[RecordRow]) -> Result<(), IoError> {
        // The slice is encoded in full before anything touches the file.
        let mut buf = String::new();
        for row in rows {
            let line = serde_json::to_string(row).map_err(|e| IoError::Encode {
                what: format!("record row at {}", row.end_time),
                reason: e.to_string(),
            })?;
            buf.push_str(&line);
            buf.push('\n');
        }
        self.file
            .write_all(buf.as_bytes())
            .map_err(|e| IoError::file("write", &self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| IoError::file("sync", &self.path, e))?;
        self.rows += rows.len() as u64;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }

    fn truncate(&mut self, keep: u64) -> Result<(), IoError> {
        let text =
            fs::read_to_string(&self.path).map_err(|e| IoError::file("read", &self.path, e))?;
        let kept: Vec<&str> = text.lines().take(1 + keep as usize).collect();
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, kept.join("\n") + "\n").map_err(|e| IoError::file("write", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| IoError::file("rename", &self.path, e))?;
        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| IoError::file("open", &self.path, e))?;
        self.rows = keep;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), IoError> {
        self.file
            .sync_all()
            .map_err(|e| IoError::file("sync", &self.path, e))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/* ──────────────────────────────── CSV ─────────────────────────────────── */

/// Flat CSV: a `#`-prefixed JSON metadata line, a column header, then
/// `end_time,window_seconds,method,cell values...` per row.
pub struct CsvSink {
    path: PathBuf,
    file: File,
    rows: u64,
}

impl CsvSink {
    pub fn create(path: PathBuf, meta: RecordMeta) -> Result<Self, IoError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| IoError::file("create", parent, e))?;
        }
        let mut file = File::create(&path).map_err(|e| IoError::file("create", &path, e))?;
        let header = serde_json::to_string(&meta).map_err(|e| IoError::Encode {
            what: format!("record metadata for '{}'", meta.variable),
            reason: e.to_string(),
        })?;
        writeln!(file, "# {header}").map_err(|e| IoError::file("write", &path, e))?;
        writeln!(file, "end_time,window_seconds,method,values")
            .map_err(|e| IoError::file("write", &path, e))?;
        Ok(Self {
            path,
            file,
            rows: 0,
        })
    }
}

impl RecordSink for CsvSink {
    fn append(&mut self, rows: &[RecordRow]) -> Result<(), IoError> {
        let mut buf = String::new();
        for row in rows {
            buf.push_str(&row.end_time);
            buf.push(',');
            buf.push_str(&row.window_seconds.to_string());
            buf.push(',');
            buf.push_str(&row.method.to_string());
            for v in &row.data {
                buf.push(',');
                buf.push_str(&format!("{v:e}"));
            }
            buf.push('\n');
        }
        self.file
            .write_all(buf.as_bytes())
            .map_err(|e| IoError::file("write", &self.path, e))?;
        self.file
            .sync_data()
            .map_err(|e| IoError::file("sync", &self.path, e))?;
        self.rows += rows.len() as u64;
        Ok(())
    }

    fn rows_written(&self) -> u64 {
        self.rows
    }

    fn truncate(&mut self, keep: u64) -> Result<(), IoError> {
        let text =
            fs::read_to_string(&self.path).map_err(|e| IoError::file("read", &self.path, e))?;
        let kept: Vec<&str> = text.lines().take(2 + keep as usize).collect();
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, kept.join("\n") + "\n").map_err(|e| IoError::file("write", &tmp, e))?;
        fs::rename(&tmp, &self.path).map_err(|e| IoError::file("rename", &self.path, e))?;
        self.file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|e| IoError::file("open", &self.path, e))?;
        self.rows = keep;
        Ok(())
    }

    fn sync(&mut self) -> Result<(), IoError> {
        self.file
            .sync_all()
            .map_err(|e| IoError::file("sync", &self.path, e))
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> RecordMeta {
        RecordMeta {
            identifier: "demo".to_string(),
            component: "surfacelayer".to_string(),
            variable: "output_x".to_string(),
            units: "kg m-2 s-1".to_string(),
            methods: vec![AggregationMethod::Point],
        }
    }

    fn row(t: i64) -> RecordRow {
        RecordRow {
            end_seconds: t,
            end_time: format!("t{t}"),
            window_seconds: 86_400,
            method: AggregationMethod::Point,
            shape: vec![1, 2],
            data: vec![t as f64, 2.0 * t as f64],
        }
    }

    #[test]
    fn jsonl_append_and_read_back() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        let mut sink = JsonLinesSink::create(path.clone(), meta()).unwrap();
        sink.append(&[row(1), row(2)]).unwrap();
        sink.append(&[row(3)]).unwrap();
        sink.sync().unwrap();
        assert_eq!(sink.rows_written(), 3);

        let (m, rows) = JsonLinesSink::read(&path).unwrap();
        assert_eq!(m.variable, "output_x");
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2], row(3));
    }

    #[test]
    fn jsonl_truncate_drops_tail_rows_and_appends_cleanly() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.jsonl");
        let mut sink = JsonLinesSink::create(path.clone(), meta()).unwrap();
        sink.append(&[row(1), row(2), row(3), row(4)]).unwrap();
        sink.truncate(2).unwrap();
        assert_eq!(sink.rows_written(), 2);
        sink.append(&[row(30)]).unwrap();

        let (_, rows) = JsonLinesSink::read(&path).unwrap();
        assert_eq!(
            rows.iter().map(|r| r.end_seconds).collect::<Vec<_>>(),
            vec![1, 2, 30]
        );
    }

    #[test]
    fn csv_rows_accumulate() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("records.csv");
        let mut sink = CsvSink::create(path.clone(), meta()).unwrap();
        sink.append(&[row(1), row(2)]).unwrap();
        sink.truncate(1).unwrap();
        sink.append(&[row(9)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 4); // meta + header + 2 rows
        assert!(lines[2].starts_with("t1,86400,point,"));
        assert!(lines[3].starts_with("t9,86400,point,"));
    }

    #[test]
    fn extension_picks_the_backend() {
        let tmp = tempfile::tempdir().unwrap();
        let sink = sink_for_path(tmp.path().join("r.csv"), meta()).unwrap();
        assert!(sink.path().ends_with("r.csv"));
        let sink = sink_for_path(tmp.path().join("r.jsonl"), meta()).unwrap();
        assert!(sink.path().ends_with("r.jsonl"));
    }
}
