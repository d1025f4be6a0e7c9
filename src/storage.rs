use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{error, info};
use tempfile::NamedTempFile;

use crate::error::PersistError;
use crate::scraper::{Product, ProductId, decode_products};

/// Every product seen so far, backed by a JSON array on disk.
///
/// `initialized` is false when the store started out empty or unreadable.
/// While it is false, new products are recorded without being announced,
/// so a first run does not flood the webhook with the whole catalog.
#[derive(Debug)]
pub struct KnownProducts {
    path: PathBuf,
    products: HashMap<ProductId, Product>,
    initialized: bool,
}

impl KnownProducts {
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            products: HashMap::new(),
            initialized: false,
        }
    }

    /// Loads the persisted store. Never fails: a missing file is created,
    /// and an unreadable one is logged and treated as empty.
    pub fn load(path: impl Into<PathBuf>) -> Self {
        let mut store = Self::empty(path);
        info!("Loading known products from {}", store.path.display());

        let bytes = match fs::read(&store.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("{} not found, creating it", store.path.display());
                if let Err(e) = create_empty(&store.path) {
                    error!("Failed to create {}: {e}", store.path.display());
                }
                return store;
            }
            Err(e) => {
                error!("Failed to read {}: {e}", store.path.display());
                return store;
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return store;
        }

        match serde_json::from_slice::<Vec<serde_json::Value>>(&bytes) {
            Ok(records) => {
                for product in decode_products(records) {
                    store.products.entry(product.id.clone()).or_insert(product);
                }
                store.initialized = true;
                info!("Loaded {} known products", store.len());
            }
            Err(e) => error!("Failed to decode {}: {e}", store.path.display()),
        }
        store
    }

    pub fn contains(&self, id: &str) -> bool {
        self.products.contains_key(id)
    }

    /// Marks a product as known. The first record for an id is kept.
    pub fn record_new(&mut self, product: Product) -> bool {
        if self.contains(&product.id) {
            return false;
        }
        self.products.insert(product.id.clone(), product);
        true
    }

    #[cfg(test)]
    pub fn get(&self, id: &str) -> Option<&Product> {
        self.products.get(id)
    }

    pub fn len(&self) -> usize {
        self.products.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn mark_initialized(&mut self) {
        self.initialized = true;
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends `new_products` to the file on disk.
    ///
    /// The existing array is read back as raw JSON so that fields this
    /// version does not model survive the rewrite. The result is written to
    /// a sibling temp file and renamed over the original.
    pub fn persist(&self, new_products: &[Product]) -> Result<(), PersistError> {
        let mut records = self.read_records()?;
        for product in new_products {
            records.push(serde_json::to_value(product).map_err(|e| self.json_err(e))?);
        }

        let dir = match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        };
        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.io_err(e))?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer(&mut writer, &records).map_err(|e| self.json_err(e))?;
            writer.flush().map_err(|e| self.io_err(e))?;
        }
        tmp.as_file().sync_all().map_err(|e| self.io_err(e))?;
        tmp.persist(&self.path).map_err(|e| self.io_err(e.error))?;

        info!(
            "Persisted {} new products ({} total on disk)",
            new_products.len(),
            records.len()
        );
        Ok(())
    }

    fn read_records(&self) -> Result<Vec<serde_json::Value>, PersistError> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_err(e)),
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }
        serde_json::from_slice(&bytes).map_err(|e| self.json_err(e))
    }

    fn io_err(&self, source: io::Error) -> PersistError {
        PersistError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn json_err(&self, source: serde_json::Error) -> PersistError {
        PersistError::Json {
            path: self.path.clone(),
            source,
        }
    }
}

fn create_empty(path: &Path) -> io::Result<()> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir)?;
    }
    File::create(path).map(drop)
}
