//! Dump files and checkpoint frames.
//!
//! A frame serialises everything an in-flight simulation needs to continue
//! bit-identically: per-component state histories (plus shelf), the
//! exchanger buffers, the recorder partial accumulators with flush
//! positions, and the clock position. One dump file per component plus a
//! model-level file and a JSON manifest; files are rewritten through a
//! rename so a crashed dump never corrupts earlier frames.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;

use hydroflux_common::{DateTime, IoError};

use crate::exchanger::ExchangerSnapshot;
use crate::recorder::RecorderSnapshot;
use crate::state::StateSnapshot;

/// Model-level part of a checkpoint frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct ModelFrame {
    pub datetime: String,
    pub seconds: i64,
    /// Clock position: the next tick to run.
    pub tick: u64,
    /// Tick bounds of the window the dumped run was covering.
    pub window_start_tick: u64,
    pub window_end_tick: u64,
    pub dumping_seconds: Option<i64>,
    pub exchanger: ExchangerSnapshot,
    /// Per-component recorder state, in adapter order.
    pub recorders: Vec<RecorderSnapshot>,
}

/// Per-component part of a checkpoint frame.
#[derive(Debug, Serialize, Deserialize)]
pub struct ComponentFrame {
    pub states: BTreeMap<String, StateSnapshot>,
    pub shelf: Option<serde_json::Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct DumpManifest {
    identifier: String,
    tag: String,
    /// Frame instants, seconds-since-reference with ISO labels.
    frames: Vec<(i64, String)>,
}

/// Reads and writes the dump files of one run tag.
pub struct DumpStore {
    identifier: String,
    tag: String,
    model_dir: PathBuf,
    /// `(category, saving directory)` per component, in adapter order.
    components: Vec<(String, PathBuf)>,
}

impl DumpStore {
    pub fn new(
        identifier: impl Into<String>,
        tag: impl Into<String>,
        model_dir: PathBuf,
        components: Vec<(String, PathBuf)>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            tag: tag.into(),
            model_dir,
            components,
        }
    }

    fn manifest_path(&self) -> PathBuf {
        self.model_dir
            .join(format!("{}_{}_dump_manifest.json", self.identifier, self.tag))
    }

    fn model_path(&self) -> PathBuf {
        self.model_dir
            .join(format!("{}_{}_dump_model.bin", self.identifier, self.tag))
    }

    fn component_path(&self, category: &str, dir: &Path) -> PathBuf {
        dir.join(format!("{}_{}_dump_{}.bin", self.identifier, self.tag, category))
    }

    /// Appends one frame at `at` to every dump file and refreshes the
    /// manifest.
    pub fn write(
        &self,
        at: DateTime,
        model: ModelFrame,
        components: Vec<ComponentFrame>,
    ) -> Result<(), IoError> {
        debug_assert_eq!(components.len(), self.components.len());
        let key = at.seconds();

        let mut frames: BTreeMap<i64, ModelFrame> = load_or_default(&self.model_path())?;
        frames.insert(key, model);
        store(&self.model_path(), &frames)?;

        for ((category, dir), frame) in self.components.iter().zip(components) {
            let path = self.component_path(category, dir);
            let mut frames: BTreeMap<i64, ComponentFrame> = load_or_default(&path)?;
            frames.insert(key, frame);
            store(&path, &frames)?;
        }

        let mut manifest: DumpManifest = match fs::read_to_string(self.manifest_path()) {
            Ok(text) => serde_json::from_str(&text).map_err(|e| IoError::Decode {
                path: self.manifest_path(),
                reason: e.to_string(),
            })?,
            Err(_) => DumpManifest {
                identifier: self.identifier.clone(),
                tag: self.tag.clone(),
                frames: Vec::new(),
            },
        };
        manifest.frames.retain(|(s, _)| *s != key);
        manifest.frames.push((key, at.to_string()));
        manifest.frames.sort();
        let text = serde_json::to_string_pretty(&manifest).map_err(|e| IoError::Encode {
            what: "dump manifest".to_string(),
            reason: e.to_string(),
        })?;
        write_via_rename(&self.manifest_path(), text.as_bytes())?;
        Ok(())
    }

    /// Instant of the latest frame at or before `at`.
    pub fn latest_at(&self, at: DateTime) -> Result<i64, IoError> {
        let text = fs::read_to_string(self.manifest_path())
            .map_err(|e| IoError::file("read", self.manifest_path(), e))?;
        let manifest: DumpManifest = serde_json::from_str(&text).map_err(|e| IoError::Decode {
            path: self.manifest_path(),
            reason: e.to_string(),
        })?;
        manifest
            .frames
            .iter()
            .rev()
            .find(|(s, _)| *s <= at.seconds())
            .map(|(s, _)| *s)
            .ok_or_else(|| IoError::NoFrame {
                tag: self.tag.clone(),
                at: at.to_string(),
            })
    }

    /// Loads the complete frame written at `seconds`.
    pub fn load(&self, seconds: i64) -> Result<(ModelFrame, Vec<ComponentFrame>), IoError> {
        let missing = |path: &Path| IoError::Decode {
            path: path.to_path_buf(),
            reason: format!("no frame at {seconds}"),
        };
        let mut models: BTreeMap<i64, ModelFrame> = load_or_default(&self.model_path())?;
        let model = models
            .remove(&seconds)
            .ok_or_else(|| missing(&self.model_path()))?;
        let mut components = Vec::with_capacity(self.components.len());
        for (category, dir) in &self.components {
            let path = self.component_path(category, dir);
            let mut frames: BTreeMap<i64, ComponentFrame> = load_or_default(&path)?;
            components.push(frames.remove(&seconds).ok_or_else(|| missing(&path))?);
        }
        Ok((model, components))
    }
}

fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, IoError> {
    match fs::read(path) {
        Err(_) => Ok(T::default()),
        Ok(bytes) => bincode::deserialize(&bytes).map_err(|e| IoError::Decode {
            path: path.to_path_buf(),
            reason: e.to_string(),
        }),
    }
}

fn store<T: Serialize>(path: &Path, value: &T) -> Result<(), IoError> {
    let bytes = bincode::serialize(value).map_err(|e| IoError::Encode {
        what: path.display().to_string(),
        reason: e.to_string(),
    })?;
    write_via_rename(path, &bytes)
}

fn write_via_rename(path: &Path, bytes: &[u8]) -> Result<(), IoError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| IoError::file("create", parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes).map_err(|e| IoError::file("write", &tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| IoError::file("rename", path, e))
}
