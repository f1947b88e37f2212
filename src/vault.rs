//! A folder of markdown notes as the record source and mutation target.

use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail, ensure};
use async_trait::async_trait;
use log::{debug, info, warn};
use serde_yaml::{Mapping, Value as YamlValue};
use tokio::sync::Mutex as AsyncMutex;
use walkdir::{DirEntry, WalkDir};

use crate::frontmatter::{
    merge_frontmatter, parse_mapping, parse_mapping_lenient, render_blank_note, render_note,
    sanitize_title, split_frontmatter,
};
use crate::matrix::Record;
use crate::property::{PropertyId, PropertySource};
use crate::value::PropertyValue;
use crate::writeback::{AxisTarget, FrontmatterEditor, FrontmatterMutator, bucket_key_to_writable_value};

pub const DEFAULT_CONFIG_FILE: &str = ".bucket-matrix.json";
const NOTE_EXTENSION: &str = "md";

/// One markdown note: its vault-relative path and parsed frontmatter.
#[derive(Debug, Clone, PartialEq)]
pub struct NoteRecord {
    path: String,
    frontmatter: Mapping,
}

impl NoteRecord {
    pub fn new(path: impl Into<String>, frontmatter: Mapping) -> Self {
        Self {
            path: path.into(),
            frontmatter,
        }
    }

    pub fn frontmatter(&self) -> &Mapping {
        &self.frontmatter
    }

    fn file_value(&self, name: &str) -> PropertyValue {
        let path = Path::new(&self.path);
        let text = |s: Option<&str>| s.map(PropertyValue::text).unwrap_or_default();
        match name {
            "path" => PropertyValue::text(self.path.as_str()),
            "name" => text(path.file_name().and_then(|n| n.to_str())),
            "basename" => text(path.file_stem().and_then(|n| n.to_str())),
            "ext" => text(path.extension().and_then(|n| n.to_str())),
            "folder" => PropertyValue::text(
                self.path
                    .rsplit_once('/')
                    .map(|(folder, _)| folder)
                    .unwrap_or_default(),
            ),
            _ => PropertyValue::Absent,
        }
    }
}

impl Record for NoteRecord {
    fn path(&self) -> &str {
        &self.path
    }

    fn value(&self, property: &PropertyId) -> PropertyValue {
        match property.source() {
            PropertySource::Note => self
                .frontmatter
                .get(property.name())
                .map(PropertyValue::from)
                .unwrap_or_default(),
            PropertySource::File => self.file_value(property.name()),
            PropertySource::Formula => PropertyValue::Absent,
        }
    }
}

/// What to create for a cell, and where.
#[derive(Debug, Clone)]
pub struct CreateNoteRequest {
    pub title: String,
    pub folder: String,
    pub template: Option<String>,
    pub rows: AxisTarget,
    pub cols: AxisTarget,
    pub row_key: String,
    pub col_key: String,
}

pub struct Vault {
    root: PathBuf,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with('.'))
}

fn relative_slash_path(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts = relative
        .components()
        .map(|c| c.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}

impl Vault {
    pub fn open(root: &Path) -> Result<Self> {
        ensure!(root.is_dir(), "Vault folder {root:?} does not exist");
        Ok(Self {
            root: root.to_path_buf(),
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn default_config_path(&self) -> PathBuf {
        self.root.join(DEFAULT_CONFIG_FILE)
    }

    /// Every `.md` note under the root, skipping hidden entries, in path
    /// order.
    pub fn load_notes(&self) -> Result<Vec<NoteRecord>> {
        let mut notes = Vec::new();
        let walker = WalkDir::new(&self.root)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !is_hidden(entry));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    warn!("Skipping unreadable entry: {err}");
                    continue;
                }
            };
            let path = entry.path();
            if !entry.file_type().is_file()
                || path.extension().and_then(|e| e.to_str()) != Some(NOTE_EXTENSION)
            {
                continue;
            }
            let Some(relative) = relative_slash_path(&self.root, path) else {
                warn!("Skipping note with non UTF-8 path {path:?}");
                continue;
            };
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) => {
                    warn!("Skipping unreadable note {relative}: {err}");
                    continue;
                }
            };
            let split = split_frontmatter(&text)?;
            let frontmatter = parse_mapping_lenient(split.frontmatter, &relative);
            notes.push(NoteRecord::new(relative, frontmatter));
        }
        debug!("Loaded {} note(s) from {:?}", notes.len(), self.root);
        Ok(notes)
    }

    /// Resolves a vault-relative path, refusing anything that would leave
    /// the vault.
    pub fn note_path(&self, relative: &str) -> Result<PathBuf> {
        let candidate = Path::new(relative);
        ensure!(!relative.trim().is_empty(), "Note path is empty");
        for component in candidate.components() {
            match component {
                Component::Normal(_) | Component::CurDir => {}
                _ => bail!("Path '{relative}' is outside the vault"),
            }
        }
        Ok(self.root.join(candidate))
    }

    fn lock_for(&self, relative: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks.entry(relative.to_string()).or_default().clone()
    }

    /// Creates a note pre-filled with the cell's writable axis values and
    /// returns its vault-relative path.
    pub async fn create_note_for_cell(&self, request: &CreateNoteRequest) -> Result<String> {
        let mut injected = Mapping::new();
        for (target, key) in [
            (&request.rows, &request.row_key),
            (&request.cols, &request.col_key),
        ] {
            if !target.property.is_writable() {
                debug!("Not injecting {}: property is not writable", target.property);
                continue;
            }
            match bucket_key_to_writable_value(&target.spec, key) {
                Ok(value) => {
                    injected.insert(
                        YamlValue::String(target.property.name().to_string()),
                        YamlValue::String(value),
                    );
                }
                Err(reason) => debug!(
                    "Not injecting {} for bucket '{key}': {}",
                    target.property,
                    reason.reason().unwrap_or("empty")
                ),
            }
        }

        let title = sanitize_title(&request.title)?;
        let folder = request.folder.trim().trim_matches('/');
        let folder_path = if folder.is_empty() {
            self.root.clone()
        } else {
            self.note_path(folder)?
        };
        tokio::fs::create_dir_all(&folder_path)
            .await
            .with_context(|| format!("Creating folder {folder_path:?}"))?;

        let mut file_name = format!("{title}.{NOTE_EXTENSION}");
        let mut counter = 1;
        while tokio::fs::try_exists(folder_path.join(&file_name)).await? {
            counter += 1;
            file_name = format!("{title}-{counter}.{NOTE_EXTENSION}");
        }
        let full_path = folder_path.join(&file_name);
        let relative = if folder.is_empty() {
            file_name
        } else {
            format!("{folder}/{file_name}")
        };

        let content = match &request.template {
            Some(template) => match self.read_template(template).await {
                Ok(text) => {
                    let split = split_frontmatter(&text)?;
                    let merged = merge_frontmatter(split.frontmatter, &injected, template);
                    render_note(&merged, split.body, split.newline)?
                }
                Err(err) => {
                    warn!("Template {template} unavailable, creating blank note: {err:#}");
                    render_blank_note(&injected)?
                }
            },
            None => render_blank_note(&injected)?,
        };

        tokio::fs::write(&full_path, content)
            .await
            .with_context(|| format!("Writing note {full_path:?}"))?;
        info!("Created note {relative}");
        Ok(relative)
    }

    async fn read_template(&self, template: &str) -> Result<String> {
        let path = self.note_path(template)?;
        tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Reading template {path:?}"))
    }
}

#[async_trait]
impl FrontmatterEditor for Vault {
    async fn process_front_matter(&self, path: &str, mutator: FrontmatterMutator<'_>) -> Result<()> {
        let full_path = self.note_path(path)?;
        let lock = self.lock_for(path);
        let _guard = lock.lock().await;

        let text = tokio::fs::read_to_string(&full_path)
            .await
            .with_context(|| format!("Reading note {full_path:?}"))?;
        let split = split_frontmatter(&text)?;
        let mut frontmatter =
            parse_mapping(split.frontmatter).with_context(|| format!("Editing note {path}"))?;
        mutator(&mut frontmatter);
        let rendered = render_note(&frontmatter, split.body, split.newline)?;

        let staging = full_path.with_extension("md.tmp");
        tokio::fs::write(&staging, rendered)
            .await
            .with_context(|| format!("Writing note {staging:?}"))?;
        tokio::fs::rename(&staging, &full_path)
            .await
            .with_context(|| format!("Replacing note {full_path:?}"))?;
        debug!("Updated frontmatter of {path}");
        Ok(())
    }
}
