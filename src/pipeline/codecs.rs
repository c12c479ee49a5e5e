//! Codec table: the named compression backends a pipeline can dispatch to,
//! plus the process-global registry the tuner registers the entropy probe
//! into.
//!
//! Backends are plain function pairs. LZ4 ignores the requested level (it is
//! a fixed-speed codec); ZSTD and ZLIB map levels 1..=9 straight through.

use std::collections::BTreeMap;
use std::fmt;
use std::io::Read;
use std::sync::{OnceLock, RwLock};

use crate::cparams::Codec;
use crate::entropy;

// ── Errors ───────────────────────────────────────────────────────────────────

/// Failure inside a codec backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// The backend rejected the data or ran out of output room.
    Backend(String),
    /// The entry has no decoder (the entropy probe) or no encoder.
    Unsupported(&'static str),
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Backend(msg) => write!(f, "codec backend error: {msg}"),
            CodecError::Unsupported(what) => write!(f, "codec does not support {what}"),
        }
    }
}

impl std::error::Error for CodecError {}

// ── Entries ──────────────────────────────────────────────────────────────────

pub type EncodeFn = fn(&[u8], u8) -> Result<Vec<u8>, CodecError>;
pub type DecodeFn = fn(&[u8], usize) -> Result<Vec<u8>, CodecError>;
pub type EstimateFn = fn(&[u8]) -> usize;

/// One slot in the codec table.
#[derive(Clone, Copy)]
pub struct CodecEntry {
    pub id: u8,
    pub name: &'static str,
    pub encode: Option<EncodeFn>,
    pub decode: Option<DecodeFn>,
    /// Size estimator for probe-style entries that emit no bytes.
    pub estimate: Option<EstimateFn>,
}

impl fmt::Debug for CodecEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecEntry")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("encode", &self.encode.is_some())
            .field("decode", &self.decode.is_some())
            .field("estimate", &self.estimate.is_some())
            .finish()
    }
}

// ── Backends ─────────────────────────────────────────────────────────────────

fn lz4_encode(src: &[u8], _clevel: u8) -> Result<Vec<u8>, CodecError> {
    Ok(lz4_flex::block::compress(src))
}

fn lz4_decode(src: &[u8], nbytes: usize) -> Result<Vec<u8>, CodecError> {
    lz4_flex::block::decompress(src, nbytes).map_err(|e| CodecError::Backend(e.to_string()))
}

fn zstd_encode(src: &[u8], clevel: u8) -> Result<Vec<u8>, CodecError> {
    zstd::bulk::compress(src, clevel as i32).map_err(|e| CodecError::Backend(e.to_string()))
}

fn zstd_decode(src: &[u8], nbytes: usize) -> Result<Vec<u8>, CodecError> {
    zstd::bulk::decompress(src, nbytes).map_err(|e| CodecError::Backend(e.to_string()))
}

fn zlib_encode(src: &[u8], clevel: u8) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    let mut enc = flate2::read::ZlibEncoder::new(src, flate2::Compression::new(clevel as u32));
    enc.read_to_end(&mut out)
        .map_err(|e| CodecError::Backend(e.to_string()))?;
    Ok(out)
}

fn zlib_decode(src: &[u8], nbytes: usize) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(nbytes);
    let mut dec = flate2::read::ZlibDecoder::new(src);
    dec.read_to_end(&mut out)
        .map_err(|e| CodecError::Backend(e.to_string()))?;
    Ok(out)
}

// ── Registry ─────────────────────────────────────────────────────────────────

/// Process-wide codec table. Built-in backends are present from the start;
/// additional entries (the entropy probe) are registered at tuner init.
pub struct CodecRegistry {
    entries: RwLock<BTreeMap<u8, CodecEntry>>,
}

impl CodecRegistry {
    fn with_builtins() -> CodecRegistry {
        let mut entries = BTreeMap::new();
        for entry in [
            CodecEntry {
                id: Codec::Lz4.id(),
                name: Codec::Lz4.name(),
                encode: Some(lz4_encode as EncodeFn),
                decode: Some(lz4_decode as DecodeFn),
                estimate: None,
            },
            CodecEntry {
                id: Codec::Zstd.id(),
                name: Codec::Zstd.name(),
                encode: Some(zstd_encode as EncodeFn),
                decode: Some(zstd_decode as DecodeFn),
                estimate: None,
            },
            CodecEntry {
                id: Codec::Zlib.id(),
                name: Codec::Zlib.name(),
                encode: Some(zlib_encode as EncodeFn),
                decode: Some(zlib_decode as DecodeFn),
                estimate: None,
            },
        ] {
            entries.insert(entry.id, entry);
        }
        CodecRegistry {
            entries: RwLock::new(entries),
        }
    }

    /// The shared table used by every context in the process.
    pub fn global() -> &'static CodecRegistry {
        static REGISTRY: OnceLock<CodecRegistry> = OnceLock::new();
        REGISTRY.get_or_init(CodecRegistry::with_builtins)
    }

    /// Adds an entry unless the id is already taken. Returns whether the
    /// entry was inserted, which makes repeated registration harmless.
    pub fn register(&self, entry: CodecEntry) -> bool {
        let mut entries = self.entries.write().expect("codec registry poisoned");
        if entries.contains_key(&entry.id) {
            return false;
        }
        entries.insert(entry.id, entry);
        true
    }

    pub fn contains(&self, id: u8) -> bool {
        self.entries
            .read()
            .expect("codec registry poisoned")
            .contains_key(&id)
    }

    pub fn get(&self, id: u8) -> Option<CodecEntry> {
        self.entries
            .read()
            .expect("codec registry poisoned")
            .get(&id)
            .copied()
    }
}

/// Registers the entropy probe under its reserved id. Idempotent: calling it
/// from every tuner init is fine.
pub fn register_entropy_probe(registry: &CodecRegistry) {
    registry.register(CodecEntry {
        id: entropy::ENTROPY_PROBE_ID,
        name: entropy::ENTROPY_PROBE_NAME,
        encode: None,
        decode: None,
        estimate: Some(entropy::estimated_size as EstimateFn),
    });
}

// ── Tests ────────────────────────────────────────────────────────────────────
