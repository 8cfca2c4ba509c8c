//! Gallery of known identities, loaded from the JSON encodings store.
//!
//! The store is `{"names": [...], "encodings": [...]}` with `encodings`
//! aligned by index to `names`. Each encoding entry is either a single
//! vector (averaged enrollment) or a list of vectors (appended over time).
//! Both shapes are normalized to `name -> Vec<Embedding>`.

use crate::types::{Embedding, UNKNOWN_LABEL};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery store not found: {0}")]
    NotFound(PathBuf),
    #[error("failed to read gallery store {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed gallery store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("gallery has {names} names but {encodings} encoding entries")]
    LengthMismatch { names: usize, encodings: usize },
    #[error("identity {0:?} has no reference vectors")]
    EmptyIdentity(String),
    #[error("identity {0:?} has an empty reference vector")]
    EmptyVector(String),
    #[error("identity name {0:?} is reserved for unrecognized faces")]
    ReservedName(String),
    #[error("identity {name:?} has a {actual}-dim vector, expected {expected}")]
    DimensionMismatch {
        name: String,
        expected: usize,
        actual: usize,
    },
}

/// On-disk encoding entry: one vector, or a list of vectors.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum EncodingEntry {
    Single(Vec<f32>),
    Many(Vec<Vec<f32>>),
}

#[derive(Debug, Deserialize)]
struct GalleryFile {
    names: Vec<String>,
    encodings: Vec<EncodingEntry>,
}

/// Canonical output shape: always a list of vectors per identity.
#[derive(Serialize)]
struct GalleryFileOut<'a> {
    names: Vec<&'a str>,
    encodings: Vec<Vec<&'a [f32]>>,
}

/// A known identity with its reference vectors.
#[derive(Debug, Clone, PartialEq)]
pub struct Identity {
    pub name: String,
    pub vectors: Vec<Embedding>,
}

/// Ordered set of known identities.
///
/// Iteration order is the order of first appearance in the store, which
/// the first-match policy depends on.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    /// An empty gallery. Every face resolves as Unknown.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load and normalize the gallery store at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, GalleryError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(GalleryError::NotFound(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let gallery = Self::from_json(&raw)?;
        tracing::info!(
            path = %path.display(),
            identities = gallery.len(),
            vectors = gallery.vector_count(),
            "loaded gallery"
        );
        Ok(gallery)
    }

    /// Parse and normalize a gallery store document.
    pub fn from_json(raw: &str) -> Result<Self, GalleryError> {
        let file: GalleryFile = serde_json::from_str(raw)?;
        if file.names.len() != file.encodings.len() {
            return Err(GalleryError::LengthMismatch {
                names: file.names.len(),
                encodings: file.encodings.len(),
            });
        }

        let mut gallery = Gallery::empty();
        for (name, entry) in file.names.into_iter().zip(file.encodings) {
            let vectors = match entry {
                EncodingEntry::Single(v) if v.is_empty() => {
                    return Err(GalleryError::EmptyIdentity(name));
                }
                EncodingEntry::Single(v) => vec![v],
                EncodingEntry::Many(vs) if vs.is_empty() => {
                    return Err(GalleryError::EmptyIdentity(name));
                }
                EncodingEntry::Many(vs) => vs,
            };
            for values in vectors {
                gallery.push(&name, Embedding::new(values))?;
            }
        }
        Ok(gallery)
    }

    /// Append a reference vector for `name`, creating the identity if absent.
    ///
    /// Duplicate names in a store are merged into the first occurrence.
    pub fn enroll(&mut self, name: &str, embedding: Embedding) -> Result<(), GalleryError> {
        self.push(name, embedding)
    }

    fn push(&mut self, name: &str, embedding: Embedding) -> Result<(), GalleryError> {
        if name == UNKNOWN_LABEL {
            return Err(GalleryError::ReservedName(name.to_string()));
        }
        if embedding.values.is_empty() {
            return Err(GalleryError::EmptyVector(name.to_string()));
        }
        if let Some(expected) = self.dim() {
            if embedding.dim() != expected {
                return Err(GalleryError::DimensionMismatch {
                    name: name.to_string(),
                    expected,
                    actual: embedding.dim(),
                });
            }
        }
        match self.identities.iter_mut().find(|i| i.name == name) {
            Some(identity) => identity.vectors.push(embedding),
            None => self.identities.push(Identity {
                name: name.to_string(),
                vectors: vec![embedding],
            }),
        }
        Ok(())
    }

    /// Write the gallery in the list-of-vectors shape, replacing `path` atomically.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), GalleryError> {
        let path = path.as_ref();
        let out = GalleryFileOut {
            names: self.identities.iter().map(|i| i.name.as_str()).collect(),
            encodings: self
                .identities
                .iter()
                .map(|i| i.vectors.iter().map(|v| v.values.as_slice()).collect())
                .collect(),
        };
        let json = serde_json::to_string(&out)?;

        let io_err = |source| GalleryError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(io_err)?;
        std::fs::rename(&tmp, path).map_err(io_err)?;
        Ok(())
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.identities.iter().find(|i| i.name == name)
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn vector_count(&self) -> usize {
        self.identities.iter().map(|i| i.vectors.len()).sum()
    }

    /// Dimensionality shared by every reference vector, if any exist.
    pub fn dim(&self) -> Option<usize> {
        self.identities
            .first()
            .and_then(|i| i.vectors.first())
            .map(Embedding::dim)
    }
}
