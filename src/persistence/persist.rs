use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use log::info;
use time::OffsetDateTime;
use time::macros::format_description;

use super::codec::{self, SerializedDocument};
use super::crypto::CryptoBox;
use super::error::Result;
use crate::graph_utils::graph::{GraphModel, ReplaceReport};

pub const DEFAULT_FILE_NAME: &str = "story.json";
pub const AUTOSAVE_FILE_NAME: &str = "story.autosave.json";

/// Receives finished bytes under a file name chosen by the caller.
pub trait ByteSink: Send + Sync {
    fn write_named(&self, name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

/// Hands back the bytes of a file the user picked.
pub trait ByteSource: Send + Sync {
    fn read_named(&self, name: &str) -> Result<Vec<u8>>;
}

/// Directory-backed sink and source.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl ByteSink for FileStore {
    fn write_named(&self, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.dir.join(name);
        atomic_write(&path, bytes)?;
        Ok(path)
    }
}

impl ByteSource for FileStore {
    fn read_named(&self, name: &str) -> Result<Vec<u8>> {
        read_file(&self.dir.join(name))
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> std::io::Result<()> {
    let tmp_path = path.with_extension("json.tmp");
    {
        let mut f = File::create(&tmp_path)?;
        f.write_all(data)?;
        f.flush()?;
    }
    fs::rename(tmp_path, path)?;
    Ok(())
}

pub fn read_file(path: &Path) -> Result<Vec<u8>> {
    let mut f = File::open(path)?;
    let mut buf = Vec::new();
    f.read_to_end(&mut buf)?;
    Ok(buf)
}

pub fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    atomic_write(path, bytes)?;
    Ok(())
}

pub fn versioned_file_name_now() -> String {
    let now = OffsetDateTime::now_utc();
    let fmt = format_description!("[year][month][day]_[hour][minute][second]");
    let stamp = now.format(fmt).unwrap_or_else(|_| "unknown".to_string());
    format!("story_{}.json", stamp)
}

pub fn list_versions(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries: Vec<PathBuf> = Vec::new();
    if dir.exists() {
        for e in fs::read_dir(dir)? {
            let p = e?.path();
            if let Some(name) = p.file_name().and_then(|s| s.to_str())
                && name.starts_with("story_") && name.ends_with(".json")
            {
                entries.push(p);
            }
        }
    }
    // sort descending by filename (timestamp)
    entries.sort();
    entries.reverse();
    Ok(entries)
}

fn passphrase_of(passphrase: Option<&str>) -> Option<&str> {
    passphrase.filter(|p| !p.is_empty())
}

/// Turns a graph into file bytes and back.
///
/// Holds no graph state of its own; the model is passed in on every call so
/// several editors (or tests) can share one service.
#[derive(Clone, Debug)]
pub struct PersistenceService {
    crypto: CryptoBox,
}

impl PersistenceService {
    pub fn new() -> Result<Self> {
        Ok(Self { crypto: CryptoBox::new()? })
    }

    pub fn with_crypto(crypto: CryptoBox) -> Self {
        Self { crypto }
    }

    /// Plain saves are indented JSON; with a non-empty passphrase the
    /// compact document is encrypted and the envelope is returned instead.
    pub async fn save(&self, model: &GraphModel, passphrase: Option<&str>) -> Result<Vec<u8>> {
        self.save_document(model.snapshot(), passphrase).await
    }

    /// `save` for a snapshot taken earlier, so callers can release the model
    /// before encryption runs.
    pub async fn save_document(&self, doc: SerializedDocument, passphrase: Option<&str>) -> Result<Vec<u8>> {
        let bytes = match passphrase_of(passphrase) {
            Some(pass) => {
                let plaintext = codec::encode(&doc)?;
                let envelope = self.crypto.encrypt(&plaintext, pass).await?;
                codec::encode_envelope(&envelope)?
            }
            None => codec::encode_pretty(&doc)?,
        };
        info!(
            "saved {} node(s), {} connection record(s) ({} bytes, encrypted: {})",
            doc.nodes.len(),
            doc.connections.len(),
            bytes.len(),
            passphrase_of(passphrase).is_some()
        );
        Ok(bytes)
    }

    /// Every fallible step runs before `model` is touched; on error the
    /// model keeps its previous contents.
    pub async fn load(&self, model: &mut GraphModel, bytes: &[u8], passphrase: Option<&str>) -> Result<ReplaceReport> {
        let doc = match passphrase_of(passphrase) {
            Some(pass) => {
                let envelope = codec::decode_envelope(bytes)?;
                let plaintext = self.crypto.decrypt(&envelope, pass).await?;
                codec::decode(&plaintext)?
            }
            None => codec::decode(bytes)?,
        };
        let report = model.replace(doc);
        info!("loaded {} node(s), {} connection record(s)", report.node_count, model.connection_count());
        Ok(report)
    }

    pub async fn save_to(
        &self,
        model: &GraphModel,
        sink: &dyn ByteSink,
        name: &str,
        passphrase: Option<&str>,
    ) -> Result<PathBuf> {
        let bytes = self.save(model, passphrase).await?;
        sink.write_named(name, &bytes)
    }

    pub async fn load_from(
        &self,
        model: &mut GraphModel,
        source: &dyn ByteSource,
        name: &str,
        passphrase: Option<&str>,
    ) -> Result<ReplaceReport> {
        let bytes = source.read_named(name)?;
        self.load(model, &bytes, passphrase).await
    }

    /// Re-wraps a stored file: decrypts with `from` (or reads plain when
    /// `None`) and re-encodes with `to` (or plain when `None`).
    pub async fn convert(&self, bytes: &[u8], from: Option<&str>, to: Option<&str>) -> Result<Vec<u8>> {
        let mut scratch = GraphModel::new();
        self.load(&mut scratch, bytes, from).await?;
        self.save(&scratch, to).await
    }
}
