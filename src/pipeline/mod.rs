//! Reference block pipeline the tuner plugs into.
//!
//! A chunk is compressed as a 32-byte header plus a payload of independent
//! block streams. Blocks can be split per type-size lane, are filtered
//! before the codec sees them, and are fanned out over a worker pool when
//! more than one thread is tuned in. The format exists to exercise the
//! tuner end to end; it is not a stable interchange format.
//!
//! Layout:
//!
//! | offset | field |
//! |--------|------------------------------------------|
//! | 0      | magic (0xB7)                             |
//! | 1      | format version (1)                       |
//! | 2      | codec id                                 |
//! | 3      | clevel (0 = stored verbatim)             |
//! | 4      | filter id                                |
//! | 5      | split flag                               |
//! | 6..8   | typesize (u16 LE)                        |
//! | 8..10  | shuffle lane width (u16 LE)              |
//! | 10     | special kind (0 none, 1 repeated byte)   |
//! | 11     | repeated byte value                      |
//! | 12..16 | uncompressed bytes (u32 LE)              |
//! | 16..20 | payload bytes (u32 LE)                   |
//! | 20..24 | blocksize (u32 LE)                       |
//! | 24..28 | block count (u32 LE)                     |
//! | 28..32 | xxh32 of the payload                     |
//!
//! The payload opens with a table of per-block stream sizes so blocks can be
//! located (and decoded) independently. Every part of a block stream carries
//! a u32 tag whose top bit marks an incompressible part stored raw.

pub mod codecs;
pub mod filters;
pub mod pool;

use std::fmt;
use std::time::Instant;

use xxhash_rust::xxh32::xxh32;

use crate::cparams::{Codec, Filter, SplitMode, MAX_FILTERS};
use crate::tuner::Tuner;
use codecs::{CodecError, CodecRegistry};
use pool::WorkerPool;

pub const KB: usize = 1 << 10;

/// Fixed chunk header length; also the overhead figure the tuner uses for
/// special-chunk detection.
pub const CHUNK_HEADER_LEN: usize = 32;

const CHUNK_MAGIC: u8 = 0xB7;
const CHUNK_VERSION: u8 = 1;
const SPECIAL_NONE: u8 = 0;
const SPECIAL_REPEAT: u8 = 1;
const RAW_PART_FLAG: u32 = 1 << 31;

// ── Errors ───────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum PipelineError {
    Codec(CodecError),
    UnknownCodec(u8),
    BadHeader(&'static str),
    ChecksumMismatch,
    Truncated,
    LengthMismatch { expected: usize, actual: usize },
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Codec(e) => write!(f, "{e}"),
            PipelineError::UnknownCodec(id) => write!(f, "unknown codec id {id}"),
            PipelineError::BadHeader(what) => write!(f, "bad chunk header: {what}"),
            PipelineError::ChecksumMismatch => write!(f, "payload checksum mismatch"),
            PipelineError::Truncated => write!(f, "chunk is truncated"),
            PipelineError::LengthMismatch { expected, actual } => {
                write!(f, "decoded length {actual}, expected {expected}")
            }
        }
    }
}

impl From<CodecError> for PipelineError {
    fn from(e: CodecError) -> Self {
        PipelineError::Codec(e)
    }
}

impl std::error::Error for PipelineError {}

// ── Contexts ─────────────────────────────────────────────────────────────────

/// Compression context. The tuner mutates the parameter fields through
/// [`Tuner::next_cparams`]; the pipeline fills the measurement fields after
/// every chunk.
pub struct Cctx {
    pub compcode: u8,
    pub filters: [u8; MAX_FILTERS],
    pub filters_meta: [u8; MAX_FILTERS],
    pub splitmode: SplitMode,
    pub clevel: u8,
    /// 0 lets the pipeline pick a size.
    pub blocksize: usize,
    pub typesize: usize,
    pub shufflesize: usize,
    pub nthreads: usize,
    /// Staged thread count, applied before the next chunk.
    pub new_nthreads: usize,

    // Filled by the pipeline per chunk.
    pub srcsize: usize,
    pub output_bytes: usize,
    pub header_overhead: usize,
    pub last_compressed: Option<Vec<u8>>,

    pub tuner: Option<Box<dyn Tuner>>,
}

impl Cctx {
    pub fn new(typesize: usize) -> Cctx {
        let typesize = typesize.max(1);
        Cctx {
            compcode: Codec::Lz4.id(),
            filters: [0; MAX_FILTERS],
            filters_meta: [0; MAX_FILTERS],
            splitmode: SplitMode::Auto,
            clevel: 5,
            blocksize: 0,
            typesize,
            shufflesize: typesize,
            nthreads: 1,
            new_nthreads: 1,
            srcsize: 0,
            output_bytes: 0,
            header_overhead: CHUNK_HEADER_LEN,
            last_compressed: None,
            tuner: None,
        }
    }

    /// The single effective filter, read from the last slot.
    pub fn effective_filter(&self) -> Filter {
        Filter::from_id(self.filters[MAX_FILTERS - 1]).unwrap_or(Filter::NoFilter)
    }

    /// Drops the installed tuner, releasing everything it owns.
    pub fn detach_tuner(&mut self) {
        self.tuner = None;
    }
}

/// Decompression context: only thread counts are tunable here.
pub struct Dctx {
    pub nthreads: usize,
    pub new_nthreads: usize,
}

impl Dctx {
    pub fn new() -> Dctx {
        Dctx {
            nthreads: 1,
            new_nthreads: 1,
        }
    }
}

impl Default for Dctx {
    fn default() -> Self {
        Dctx::new()
    }
}

// ── Blocksize ────────────────────────────────────────────────────────────────

/// Picks a block size when the context leaves it at 0. Higher levels get
/// bigger blocks so the codecs see more history.
pub fn automatic_blocksize(srcsize: usize, clevel: u8) -> usize {
    let base = match clevel {
        0..=3 => 32 * KB,
        4..=6 => 64 * KB,
        _ => 256 * KB,
    };
    base.min(srcsize.max(1))
}

// ── Compression ──────────────────────────────────────────────────────────────

fn apply_filter(filter: Filter, typesize: usize, shufflesize: usize, src: &[u8]) -> Vec<u8> {
    match filter {
        Filter::NoFilter => src.to_vec(),
        Filter::Shuffle => filters::shuffle(shufflesize.max(1), src),
        Filter::BitShuffle => filters::bitshuffle(typesize, src),
        Filter::ByteDelta => {
            filters::bytedelta_encode(typesize, &filters::shuffle(typesize, src))
        }
    }
}

fn undo_filter(filter: Filter, typesize: usize, shufflesize: usize, src: &[u8]) -> Vec<u8> {
    match filter {
        Filter::NoFilter => src.to_vec(),
        Filter::Shuffle => filters::unshuffle(shufflesize.max(1), src),
        Filter::BitShuffle => filters::bitunshuffle(typesize, src),
        Filter::ByteDelta => {
            filters::unshuffle(typesize, &filters::bytedelta_decode(typesize, src))
        }
    }
}

/// Part lengths of one block: the whole block, or one segment per lane when
/// splitting, with the remainder folded into the last segment.
fn part_lengths(blen: usize, split: bool, typesize: usize) -> Vec<usize> {
    if !split || typesize <= 1 || blen < typesize * 2 {
        return vec![blen];
    }
    let seg = blen / typesize;
    let mut parts = vec![seg; typesize];
    parts[typesize - 1] += blen - seg * typesize;
    parts
}

fn encode_part(
    entry: &codecs::CodecEntry,
    clevel: u8,
    part: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    let encode = entry
        .encode
        .ok_or(PipelineError::Codec(CodecError::Unsupported("encoding")))?;
    let mut stream = Vec::with_capacity(part.len() + 4);
    match encode(part, clevel) {
        Ok(enc) if enc.len() < part.len() => {
            stream.extend_from_slice(&(enc.len() as u32).to_le_bytes());
            stream.extend_from_slice(&enc);
        }
        // Expansion (or backend failure) falls back to storing the part raw.
        _ => {
            stream.extend_from_slice(&(part.len() as u32 | RAW_PART_FLAG).to_le_bytes());
            stream.extend_from_slice(part);
        }
    }
    Ok(stream)
}

fn encode_block(
    entry: &codecs::CodecEntry,
    clevel: u8,
    split: bool,
    typesize: usize,
    block: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    let mut stream = Vec::new();
    let mut off = 0;
    for plen in part_lengths(block.len(), split, typesize) {
        stream.extend_from_slice(&encode_part(entry, clevel, &block[off..off + plen])?);
        off += plen;
    }
    Ok(stream)
}

/// Compresses one chunk according to the parameters on `cctx`.
///
/// Probe-only codec entries (no encoder, an estimator) short-circuit: the
/// chunk is "compressed" to its header and `output_bytes` reports the
/// estimated size, which is how the tuner measures reference speeds.
pub fn compress_chunk(cctx: &mut Cctx, src: &[u8]) -> Result<Vec<u8>, PipelineError> {
    let registry = CodecRegistry::global();
    let entry = registry
        .get(cctx.compcode)
        .ok_or(PipelineError::UnknownCodec(cctx.compcode))?;

    cctx.srcsize = src.len();

    if let Some(estimate) = entry.estimate {
        // Probe path: no bytes are produced.
        cctx.output_bytes = estimate(src);
        cctx.last_compressed = None;
        return Ok(Vec::new());
    }

    let typesize = cctx.typesize.max(1);
    let filter = cctx.effective_filter();

    let mut header = [0u8; CHUNK_HEADER_LEN];
    header[0] = CHUNK_MAGIC;
    header[1] = CHUNK_VERSION;
    header[2] = cctx.compcode;
    header[3] = cctx.clevel;
    header[4] = filter.id();
    header[6..8].copy_from_slice(&(typesize.min(u16::MAX as usize) as u16).to_le_bytes());
    header[8..10]
        .copy_from_slice(&(cctx.shufflesize.min(u16::MAX as usize) as u16).to_le_bytes());
    header[12..16].copy_from_slice(&(src.len() as u32).to_le_bytes());

    // Constant chunks collapse to a bare header.
    if !src.is_empty() && src.iter().all(|&b| b == src[0]) {
        header[10] = SPECIAL_REPEAT;
        header[11] = src[0];
        let out = header.to_vec();
        cctx.output_bytes = out.len();
        cctx.last_compressed = Some(out.clone());
        return Ok(out);
    }

    let payload = if cctx.clevel == 0 || src.is_empty() {
        src.to_vec()
    } else {
        let codec = Codec::from_id(cctx.compcode).ok_or(PipelineError::UnknownCodec(cctx.compcode))?;
        let split = cctx.splitmode.resolve(codec);
        header[5] = split as u8;

        let filtered = apply_filter(filter, typesize, cctx.shufflesize, src);
        let blocksize = if cctx.blocksize == 0 {
            automatic_blocksize(filtered.len(), cctx.clevel)
        } else {
            cctx.blocksize.max(1).min(filtered.len().max(1))
        };
        header[20..24].copy_from_slice(&(blocksize as u32).to_le_bytes());
        let nblocks = filtered.len().div_ceil(blocksize);
        header[24..28].copy_from_slice(&(nblocks as u32).to_le_bytes());

        let encode_one = |i: usize| -> Result<Vec<u8>, PipelineError> {
            let start = i * blocksize;
            let end = (start + blocksize).min(filtered.len());
            encode_block(&entry, cctx.clevel, split, typesize, &filtered[start..end])
        };
        let streams: Vec<Result<Vec<u8>, PipelineError>> =
            if cctx.nthreads > 1 && nblocks > 1 {
                match WorkerPool::new(cctx.nthreads.min(nblocks)) {
                    Some(workers) => workers.map_indexed(nblocks, encode_one),
                    None => (0..nblocks).map(encode_one).collect(),
                }
            } else {
                (0..nblocks).map(encode_one).collect()
            };

        let mut table = Vec::with_capacity(nblocks * 4);
        let mut body = Vec::new();
        for stream in streams {
            let stream = stream?;
            table.extend_from_slice(&(stream.len() as u32).to_le_bytes());
            body.extend_from_slice(&stream);
        }
        table.extend_from_slice(&body);
        table
    };

    header[16..20].copy_from_slice(&(payload.len() as u32).to_le_bytes());
    header[28..32].copy_from_slice(&xxh32(&payload, 0).to_le_bytes());

    let mut out = Vec::with_capacity(CHUNK_HEADER_LEN + payload.len());
    out.extend_from_slice(&header);
    out.extend_from_slice(&payload);
    cctx.output_bytes = out.len();
    cctx.last_compressed = Some(out.clone());
    Ok(out)
}

// ── Decompression ────────────────────────────────────────────────────────────

fn read_u32(src: &[u8], off: usize) -> Result<u32, PipelineError> {
    src.get(off..off + 4)
        .map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or(PipelineError::Truncated)
}

fn decode_block(
    entry: &codecs::CodecEntry,
    split: bool,
    typesize: usize,
    blen: usize,
    stream: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    let mut out = Vec::with_capacity(blen);
    let mut off = 0;
    for plen in part_lengths(blen, split, typesize) {
        let tag = read_u32(stream, off)?;
        off += 4;
        let stored = (tag & !RAW_PART_FLAG) as usize;
        let bytes = stream.get(off..off + stored).ok_or(PipelineError::Truncated)?;
        off += stored;
        if tag & RAW_PART_FLAG != 0 {
            if stored != plen {
                return Err(PipelineError::LengthMismatch {
                    expected: plen,
                    actual: stored,
                });
            }
            out.extend_from_slice(bytes);
        } else {
            let decode = entry
                .decode
                .ok_or(PipelineError::Codec(CodecError::Unsupported("decoding")))?;
            let part = decode(bytes, plen)?;
            if part.len() != plen {
                return Err(PipelineError::LengthMismatch {
                    expected: plen,
                    actual: part.len(),
                });
            }
            out.extend_from_slice(&part);
        }
    }
    Ok(out)
}

/// Decompresses one chunk produced by [`compress_chunk`].
pub fn decompress_chunk(chunk: &[u8], nthreads: usize) -> Result<Vec<u8>, PipelineError> {
    if chunk.len() < CHUNK_HEADER_LEN {
        return Err(PipelineError::Truncated);
    }
    if chunk[0] != CHUNK_MAGIC || chunk[1] != CHUNK_VERSION {
        return Err(PipelineError::BadHeader("bad magic or version"));
    }
    let clevel = chunk[3];
    let filter = Filter::from_id(chunk[4]).ok_or(PipelineError::BadHeader("unknown filter"))?;
    let split = chunk[5] != 0;
    let typesize = u16::from_le_bytes([chunk[6], chunk[7]]) as usize;
    let shufflesize = u16::from_le_bytes([chunk[8], chunk[9]]) as usize;
    let nbytes = read_u32(chunk, 12)? as usize;
    let cbytes = read_u32(chunk, 16)? as usize;
    let blocksize = read_u32(chunk, 20)? as usize;
    let nblocks = read_u32(chunk, 24)? as usize;
    let checksum = read_u32(chunk, 28)?;

    if chunk[10] != SPECIAL_NONE {
        if chunk[10] != SPECIAL_REPEAT {
            return Err(PipelineError::BadHeader("unknown special kind"));
        }
        return Ok(vec![chunk[11]; nbytes]);
    }

    let payload = chunk
        .get(CHUNK_HEADER_LEN..CHUNK_HEADER_LEN + cbytes)
        .ok_or(PipelineError::Truncated)?;
    if xxh32(payload, 0) != checksum {
        return Err(PipelineError::ChecksumMismatch);
    }

    if clevel == 0 || nbytes == 0 {
        if payload.len() != nbytes {
            return Err(PipelineError::LengthMismatch {
                expected: nbytes,
                actual: payload.len(),
            });
        }
        return Ok(payload.to_vec());
    }

    let entry = CodecRegistry::global()
        .get(chunk[2])
        .ok_or(PipelineError::UnknownCodec(chunk[2]))?;
    if blocksize == 0 || nblocks == 0 {
        return Err(PipelineError::BadHeader("empty block geometry"));
    }
    // The checksum only covers the payload, so the geometry needs its own
    // sanity check before any arithmetic trusts it.
    let full = blocksize
        .checked_mul(nblocks)
        .ok_or(PipelineError::BadHeader("block geometry overflow"))?;
    if full < nbytes || blocksize * (nblocks - 1) >= nbytes {
        return Err(PipelineError::BadHeader("inconsistent block geometry"));
    }

    // Locate the block streams via the size table.
    let table_len = nblocks * 4;
    if payload.len() < table_len {
        return Err(PipelineError::Truncated);
    }
    let mut offsets = Vec::with_capacity(nblocks);
    let mut pos = table_len;
    for i in 0..nblocks {
        let size = read_u32(payload, i * 4)? as usize;
        offsets.push((pos, size));
        pos += size;
    }
    if pos != payload.len() {
        return Err(PipelineError::Truncated);
    }

    let decode_one = |i: usize| -> Result<Vec<u8>, PipelineError> {
        let (off, size) = offsets[i];
        let blen = if i + 1 == nblocks {
            nbytes - blocksize * (nblocks - 1)
        } else {
            blocksize
        };
        let stream = payload.get(off..off + size).ok_or(PipelineError::Truncated)?;
        decode_block(&entry, split, typesize, blen, stream)
    };
    let blocks: Vec<Result<Vec<u8>, PipelineError>> = if nthreads > 1 && nblocks > 1 {
        match WorkerPool::new(nthreads.min(nblocks)) {
            Some(workers) => workers.map_indexed(nblocks, decode_one),
            None => (0..nblocks).map(decode_one).collect(),
        }
    } else {
        (0..nblocks).map(decode_one).collect()
    };

    let mut filtered = Vec::with_capacity(nbytes);
    for block in blocks {
        filtered.extend_from_slice(&block?);
    }
    if filtered.len() != nbytes {
        return Err(PipelineError::LengthMismatch {
            expected: nbytes,
            actual: filtered.len(),
        });
    }

    Ok(undo_filter(filter, typesize.max(1), shufflesize, &filtered))
}

// ── Tuned per-chunk driver ───────────────────────────────────────────────────

/// Feeds one chunk through the pipeline with the installed tuner in the
/// loop: proposal, compression, measurement, update.
pub fn process_chunk(
    cctx: &mut Cctx,
    dctx: &mut Dctx,
    src: &[u8],
) -> Result<Vec<u8>, PipelineError> {
    if let Some(mut tuner) = cctx.tuner.take() {
        tuner.next_blocksize(cctx);
        tuner.next_cparams(cctx, Some(dctx), src);
        cctx.tuner = Some(tuner);
    }
    cctx.nthreads = cctx.new_nthreads.max(1);
    dctx.nthreads = dctx.new_nthreads.max(1);

    let started = Instant::now();
    let out = compress_chunk(cctx, src)?;
    let ctime = started.elapsed().as_secs_f64();

    if let Some(mut tuner) = cctx.tuner.take() {
        tuner.update(cctx, Some(dctx), ctime);
        cctx.tuner = Some(tuner);
    }
    Ok(out)
}

// ── Tests ────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(n: usize) -> Vec<u8> {
        (0..n)
            .map(|i| ((i / 7) as u8).wrapping_mul(31).wrapping_add(i as u8 / 11))
            .collect()
    }

    fn cctx_with(codec: Codec, filter: Filter, clevel: u8, typesize: usize) -> Cctx {
        let mut cctx = Cctx::new(typesize);
        cctx.compcode = codec.id();
        filter.fill_slots(typesize, &mut cctx.filters, &mut cctx.filters_meta);
        cctx.clevel = clevel;
        cctx
    }

    #[test]
    fn roundtrip_every_codec_and_filter() {
        let data = sample(200 * KB);
        for codec in [Codec::Lz4, Codec::Zstd, Codec::Zlib] {
            for filter in [
                Filter::NoFilter,
                Filter::Shuffle,
                Filter::BitShuffle,
                Filter::ByteDelta,
            ] {
                for split in [SplitMode::Auto, SplitMode::Always, SplitMode::Never] {
                    let mut cctx = cctx_with(codec, filter, 5, 4);
                    cctx.splitmode = split;
                    let chunk = compress_chunk(&mut cctx, &data).expect("compress");
                    let back = decompress_chunk(&chunk, 1).expect("decompress");
                    assert_eq!(back, data, "{} + {}", codec.name(), filter.name());
                }
            }
        }
    }

    #[test]
    fn roundtrip_multithreaded() {
        let data = sample(300 * KB);
        let mut cctx = cctx_with(Codec::Lz4, Filter::Shuffle, 3, 8);
        cctx.nthreads = 4;
        let chunk = compress_chunk(&mut cctx, &data).expect("compress");
        assert_eq!(decompress_chunk(&chunk, 4).expect("decompress"), data);
        assert_eq!(decompress_chunk(&chunk, 1).expect("decompress"), data);
    }

    #[test]
    fn constant_chunk_is_header_only() {
        let data = vec![0u8; 1 << 20];
        let mut cctx = cctx_with(Codec::Zstd, Filter::Shuffle, 5, 4);
        let chunk = compress_chunk(&mut cctx, &data).expect("compress");
        assert_eq!(chunk.len(), CHUNK_HEADER_LEN);
        assert!(cctx.output_bytes <= cctx.header_overhead + cctx.typesize);
        assert_eq!(decompress_chunk(&chunk, 1).expect("decompress"), data);
    }

    #[test]
    fn store_mode_keeps_bytes_verbatim() {
        let data = sample(10 * KB);
        let mut cctx = cctx_with(Codec::Lz4, Filter::NoFilter, 0, 1);
        let chunk = compress_chunk(&mut cctx, &data).expect("compress");
        assert_eq!(chunk.len(), CHUNK_HEADER_LEN + data.len());
        assert_eq!(decompress_chunk(&chunk, 1).expect("decompress"), data);
    }

    #[test]
    fn corrupted_payload_fails_checksum() {
        let data = sample(64 * KB);
        let mut cctx = cctx_with(Codec::Lz4, Filter::NoFilter, 5, 1);
        let mut chunk = compress_chunk(&mut cctx, &data).expect("compress");
        let last = chunk.len() - 1;
        chunk[last] ^= 0xff;
        assert!(matches!(
            decompress_chunk(&chunk, 1),
            Err(PipelineError::ChecksumMismatch)
        ));
    }

    #[test]
    fn truncated_chunk_is_rejected() {
        assert!(matches!(
            decompress_chunk(&[0u8; 8], 1),
            Err(PipelineError::Truncated)
        ));
    }

    #[test]
    fn empty_chunk_roundtrips() {
        let mut cctx = cctx_with(Codec::Lz4, Filter::NoFilter, 5, 1);
        let chunk = compress_chunk(&mut cctx, &[]).expect("compress");
        assert_eq!(decompress_chunk(&chunk, 1).expect("decompress"), Vec::<u8>::new());
    }

    #[test]
    fn probe_codec_reports_estimate_without_bytes() {
        codecs::register_entropy_probe(CodecRegistry::global());
        let mut cctx = Cctx::new(1);
        cctx.compcode = crate::entropy::ENTROPY_PROBE_ID;
        let data = vec![0u8; 64 * KB];
        let out = compress_chunk(&mut cctx, &data).expect("probe");
        assert!(out.is_empty());
        assert!(cctx.output_bytes > 0);
        assert!(cctx.output_bytes < data.len() / 30);
    }
}
