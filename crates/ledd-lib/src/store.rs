//! Persistence of controller and stripe definitions.
//!
//! Only static definitions are stored. Colors and running effects are
//! runtime state and are rebuilt on startup (colors by hardware read-back).

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::color::DEFAULT_GAMMA;
use crate::controller::ControllerId;
use crate::error::{LeddError, Result};
use crate::registers::MAX_FREQUENCY;
use crate::stripe::{ChannelMap, GammaMap, StripeId};

/// Current on-disk document version.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerRecord {
    /// `None` until the store assigns an id.
    #[serde(default)]
    pub id: Option<ControllerId>,
    pub i2c_dev: u8,
    pub address: u8,
    pub channels: u8,
    #[serde(default = "default_frequency")]
    pub pwm_freq: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StripeRecord {
    /// `None` until the store assigns an id.
    #[serde(default)]
    pub id: Option<StripeId>,
    pub controller_id: ControllerId,
    pub name: String,
    #[serde(default = "default_true")]
    pub rgb: bool,
    pub channels: ChannelMap,
    #[serde(default = "default_gamma")]
    pub gamma: GammaMap,
}

fn default_frequency() -> u16 {
    MAX_FREQUENCY
}

fn default_true() -> bool {
    true
}

fn default_gamma() -> GammaMap {
    [DEFAULT_GAMMA; 3]
}

/// Persistence collaborator of the runtime.
///
/// `save_*` inserts records without an id (assigning the next one) and
/// replaces records whose id is already known.
pub trait Store: Send {
    fn load_all_controllers(&self) -> Result<Vec<ControllerRecord>>;
    fn save_controller(&mut self, record: &ControllerRecord) -> Result<ControllerId>;
    fn load_stripes_for(&self, controller_id: ControllerId) -> Result<Vec<StripeRecord>>;
    fn save_stripe(&mut self, record: &StripeRecord) -> Result<StripeId>;
}

// ── Document ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Document {
    version: u32,
    next_controller_id: ControllerId,
    next_stripe_id: StripeId,
    #[serde(default)]
    controllers: Vec<ControllerRecord>,
    #[serde(default)]
    stripes: Vec<StripeRecord>,
}

impl Default for Document {
    fn default() -> Self {
        Document {
            version: STORE_VERSION,
            next_controller_id: 1,
            next_stripe_id: 1,
            controllers: Vec::new(),
            stripes: Vec::new(),
        }
    }
}

impl Document {
    fn upsert_controller(&mut self, record: &ControllerRecord) -> ControllerId {
        let mut record = record.clone();
        match record.id {
            Some(id) => {
                if let Some(slot) = self.controllers.iter_mut().find(|c| c.id == Some(id)) {
                    *slot = record;
                } else {
                    self.next_controller_id = self.next_controller_id.max(id + 1);
                    self.controllers.push(record);
                }
                id
            }
            None => {
                let id = self.next_controller_id;
                self.next_controller_id += 1;
                record.id = Some(id);
                self.controllers.push(record);
                id
            }
        }
    }

    fn upsert_stripe(&mut self, record: &StripeRecord) -> StripeId {
        let mut record = record.clone();
        match record.id {
            Some(id) => {
                if let Some(slot) = self.stripes.iter_mut().find(|s| s.id == Some(id)) {
                    *slot = record;
                } else {
                    self.next_stripe_id = self.next_stripe_id.max(id + 1);
                    self.stripes.push(record);
                }
                id
            }
            None => {
                let id = self.next_stripe_id;
                self.next_stripe_id += 1;
                record.id = Some(id);
                self.stripes.push(record);
                id
            }
        }
    }

    fn stripes_for(&self, controller_id: ControllerId) -> Vec<StripeRecord> {
        self.stripes
            .iter()
            .filter(|s| s.controller_id == controller_id)
            .cloned()
            .collect()
    }
}

// ── In-memory store ──

/// Non-persistent store, for tests and `--ephemeral` runs.
#[derive(Debug, Default)]
pub struct MemoryStore {
    doc: Document,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Store for MemoryStore {
    fn load_all_controllers(&self) -> Result<Vec<ControllerRecord>> {
        Ok(self.doc.controllers.clone())
    }

    fn save_controller(&mut self, record: &ControllerRecord) -> Result<ControllerId> {
        Ok(self.doc.upsert_controller(record))
    }

    fn load_stripes_for(&self, controller_id: ControllerId) -> Result<Vec<StripeRecord>> {
        Ok(self.doc.stripes_for(controller_id))
    }

    fn save_stripe(&mut self, record: &StripeRecord) -> Result<StripeId> {
        Ok(self.doc.upsert_stripe(record))
    }
}

// ── JSON file store ──

/// Single JSON document on disk, rewritten atomically on every save.
#[derive(Debug)]
pub struct JsonStore {
    path: PathBuf,
    doc: Document,
}

impl JsonStore {
    /// Open the store at `path`. A missing file is an empty store; an
    /// unreadable or corrupt one is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let doc = match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str::<Document>(&contents).map_err(|e| {
                LeddError::Store(format!("{}: {e}", path.display()))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Document::default(),
            Err(e) => return Err(e.into()),
        };
        if doc.version > STORE_VERSION {
            return Err(LeddError::Store(format!(
                "{}: document version {} is newer than supported ({STORE_VERSION})",
                path.display(),
                doc.version
            )));
        }
        log::debug!(
            "store {}: {} controllers, {} stripes",
            path.display(),
            doc.controllers.len(),
            doc.stripes.len()
        );
        Ok(JsonStore {
            path: path.to_path_buf(),
            doc,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the document to a temp file, then rename over the target.
    fn persist(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let contents = serde_json::to_string_pretty(&self.doc)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, &contents)?;
        if std::fs::rename(&tmp, &self.path).is_err() {
            // Rename can fail across filesystems
            let result = std::fs::write(&self.path, &contents);
            let _ = std::fs::remove_file(&tmp);
            result?;
        }
        Ok(())
    }

    /// Run `f` on a copy of the document and keep the result only if it
    /// reaches disk.
    fn commit<T>(&mut self, f: impl FnOnce(&mut Document) -> T) -> Result<T> {
        let previous = self.doc.clone();
        let out = f(&mut self.doc);
        if let Err(e) = self.persist() {
            self.doc = previous;
            return Err(e);
        }
        Ok(out)
    }
}

impl Store for JsonStore {
    fn load_all_controllers(&self) -> Result<Vec<ControllerRecord>> {
        Ok(self.doc.controllers.clone())
    }

    fn save_controller(&mut self, record: &ControllerRecord) -> Result<ControllerId> {
        self.commit(|doc| doc.upsert_controller(record))
    }

    fn load_stripes_for(&self, controller_id: ControllerId) -> Result<Vec<StripeRecord>> {
        Ok(self.doc.stripes_for(controller_id))
    }

    fn save_stripe(&mut self, record: &StripeRecord) -> Result<StripeId> {
        self.commit(|doc| doc.upsert_stripe(record))
    }
}
