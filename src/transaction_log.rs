//! Transaction log (.LOG, .LOG1, .LOG2) parsing and replay.
//!
//! A log file starts with a 4096-byte base block carrying the same `regf`
//! magic as the hive, followed by `HvLE` entries. Each entry lists dirty
//! pages (offset into the hive bins region plus bytes) that were written to
//! the log but possibly not yet to the hive. Replay copies the pages of
//! every entry newer than the hive into the in-memory image.
//!
//! Recovery is best effort. A missing, foreign or damaged log never fails
//! a hive load; at worst nothing is applied.

use crate::error::{RegistryError, Result};
use crate::header::{BASE_BLOCK_SIZE, REGF_SIGNATURE};
use crate::image::HiveImage;
use crate::utils::{read_u32_le, read_u64_le};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// File extensions recognized as transaction logs (case-insensitive).
pub const LOG_EXTENSIONS: [&str; 3] = ["LOG", "LOG1", "LOG2"];

/// Expected signature for a log entry ("HvLE").
pub const HVLE_SIGNATURE: &[u8; 4] = b"HvLE";

/// Size of the fixed log entry header.
pub const ENTRY_HEADER_SIZE: usize = 40;

/// Upper bound on dirty pages per entry.
pub const MAX_DIRTY_PAGES: u32 = 100_000;

/// Upper bound on a single dirty page.
pub const MAX_PAGE_SIZE: u32 = 256 * 1024 * 1024;

/// Default upper bound on the image size reachable through replay (512 MB).
pub const MAX_HIVE_SIZE: usize = 512 * 1024 * 1024;

/// One page patch from a log entry.
#[derive(Debug, Clone)]
pub struct DirtyPage {
    /// Offset relative to the start of the hive bins region.
    pub offset: u32,

    /// The page bytes.
    pub data: Vec<u8>,
}

/// One `HvLE` entry.
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Total entry size in bytes, header included.
    pub size: u32,

    /// Entry flags.
    pub flags: u32,

    /// Sequence number of the hive write this entry records.
    pub sequence: u32,

    /// Hive bins size at the time of the write.
    pub hive_bins_size: u32,

    /// Hash over the dirty page references and pages (not verified).
    pub hash1: u64,

    /// Hash over the entry header (not verified).
    pub hash2: u64,

    /// Pages to copy into the image.
    pub dirty_pages: Vec<DirtyPage>,
}

/// A parsed transaction log file.
#[derive(Debug, Clone, Default)]
pub struct TransactionLog {
    /// Where the log was read from, if it came from disk.
    pub path: Option<PathBuf>,

    /// Entries in file order. Parsing stops at the first invalid entry.
    pub entries: Vec<LogEntry>,
}

impl TransactionLog {
    /// Opens and parses a transaction log file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or does not start with a
    /// `regf` base block.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|e| RegistryError::from_open(e, path))?;
        let mut log = Self::parse(&data)?;
        log.path = Some(path.to_path_buf());
        Ok(log)
    }

    /// Parses transaction log data from raw bytes.
    ///
    /// # Errors
    ///
    /// Fails only when the base block is missing or foreign. Damaged
    /// entries end the scan without an error.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(RegistryError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }
        if &data[0..4] != REGF_SIGNATURE {
            return Err(RegistryError::invalid_signature(REGF_SIGNATURE, &data[0..4]));
        }

        let mut entries = Vec::new();
        let mut pos = BASE_BLOCK_SIZE;

        while data.len() - pos >= ENTRY_HEADER_SIZE && &data[pos..pos + 4] == HVLE_SIGNATURE {
            match Self::parse_entry(data, pos) {
                Ok(entry) => {
                    pos += entry.size as usize;
                    entries.push(entry);
                }
                Err(e) => {
                    debug!(position = pos, error = %e, "Stopping log scan at invalid entry");
                    break;
                }
            }
        }

        Ok(Self { path: None, entries })
    }

    /// Parses and validates the entry starting at `pos`.
    fn parse_entry(data: &[u8], pos: usize) -> Result<LogEntry> {
        let remaining = data.len() - pos;
        let size = read_u32_le(data, pos + 4)?;
        if (size as usize) < ENTRY_HEADER_SIZE || size as usize > remaining {
            return Err(RegistryError::InvalidFormat(format!(
                "Log entry size {} invalid ({} bytes remain)",
                size, remaining
            )));
        }

        let page_count = read_u32_le(data, pos + 20)?;
        if page_count > MAX_DIRTY_PAGES {
            return Err(RegistryError::InvalidFormat(format!(
                "Log entry claims {} dirty pages",
                page_count
            )));
        }

        let refs_start = pos + ENTRY_HEADER_SIZE;
        let refs_end = refs_start + page_count as usize * 8;
        if refs_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset: pos as u32,
                expected: refs_end - pos,
                actual: remaining,
            });
        }

        let mut refs = Vec::with_capacity(page_count as usize);
        let mut payload_len = 0usize;
        for i in 0..page_count as usize {
            let page_offset = read_u32_le(data, refs_start + i * 8)?;
            let page_size = read_u32_le(data, refs_start + i * 8 + 4)?;
            if page_size > MAX_PAGE_SIZE {
                return Err(RegistryError::InvalidFormat(format!(
                    "Dirty page {} size {:#x} exceeds limit",
                    i, page_size
                )));
            }
            payload_len = payload_len.saturating_add(page_size as usize);
            refs.push((page_offset, page_size as usize));
        }

        let payload_end = refs_end.saturating_add(payload_len);
        if payload_end > data.len() {
            return Err(RegistryError::TruncatedData {
                offset: pos as u32,
                expected: payload_end - pos,
                actual: remaining,
            });
        }

        let mut cursor = refs_end;
        let dirty_pages = refs
            .into_iter()
            .map(|(offset, len)| {
                let page = DirtyPage {
                    offset,
                    data: data[cursor..cursor + len].to_vec(),
                };
                cursor += len;
                page
            })
            .collect();

        Ok(LogEntry {
            size,
            flags: read_u32_le(data, pos + 8)?,
            sequence: read_u32_le(data, pos + 12)?,
            hive_bins_size: read_u32_le(data, pos + 16)?,
            hash1: read_u64_le(data, pos + 24)?,
            hash2: read_u64_le(data, pos + 32)?,
            dirty_pages,
        })
    }
}

/// Finds sibling log files of a hive, sorted by file name.
///
/// A file qualifies when its extension is one of [`LOG_EXTENSIONS`] and the
/// rest of its name equals either the hive's stem (`SYSTEM.LOG1` next to
/// `SYSTEM`, `Amcache.LOG1` next to `Amcache.hve`) or the hive's full name
/// (`Amcache.hve.LOG1`). Comparisons ignore case.
pub fn discover_logs(hive_path: &Path) -> Vec<PathBuf> {
    let Some(file_name) = hive_path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
        return Vec::new();
    };
    let stem = hive_path
        .file_stem()
        .map(|s| s.to_string_lossy().to_lowercase())
        .unwrap_or_else(|| file_name.clone());

    let dir = match hive_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "Cannot list hive directory");
            return Vec::new();
        }
    };

    let mut logs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file())
        .filter(|path| {
            let Some(name) = path.file_name().map(|n| n.to_string_lossy().to_lowercase()) else {
                return false;
            };
            let Some((base, ext)) = name.rsplit_once('.') else {
                return false;
            };
            LOG_EXTENSIONS.iter().any(|e| e.eq_ignore_ascii_case(ext)) && (base == stem || base == file_name)
        })
        .collect();

    logs.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    logs
}

/// Opens every discovered log, skipping (with a warning) any that cannot be
/// read or carry a foreign signature.
pub fn load_logs(paths: &[PathBuf]) -> Vec<TransactionLog> {
    paths
        .iter()
        .filter_map(|path| match TransactionLog::open(path) {
            Ok(log) => {
                debug!(path = %path.display(), entries = log.entries.len(), "Parsed transaction log");
                Some(log)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Ignoring transaction log");
                None
            }
        })
        .collect()
}

/// Outcome of a replay.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplayStats {
    /// Logs offered for replay.
    pub logs_read: usize,

    /// Valid entries seen across all logs.
    pub entries_seen: usize,

    /// Entries newer than the hive.
    pub entries_applied: usize,

    /// Pages copied into the image.
    pub pages_applied: usize,
}

impl ReplayStats {
    /// Returns true if at least one page was written.
    pub fn applied(&self) -> bool {
        self.pages_applied > 0
    }
}

/// Copies the pages of every entry newer than the hive into `image`.
///
/// An entry is newer when its sequence number exceeds the smaller of the
/// hive's primary and secondary sequence numbers. Pages that would grow the
/// image past `max_hive_size` are skipped. If anything was written, the
/// hive bins size of the newest applied entry is stored in the base block
/// and the header is re-parsed.
#[instrument(skip(image, logs), fields(logs = logs.len()))]
pub fn replay(image: &mut HiveImage, logs: &[TransactionLog], max_hive_size: usize) -> ReplayStats {
    let min_sequence = image.base_block().min_sequence();
    let mut stats = ReplayStats {
        logs_read: logs.len(),
        ..ReplayStats::default()
    };
    let mut newest: Option<(u32, u32)> = None;

    for entry in logs.iter().flat_map(|log| log.entries.iter()) {
        stats.entries_seen += 1;
        if entry.sequence <= min_sequence {
            debug!(sequence = entry.sequence, min_sequence, "Skipping stale log entry");
            continue;
        }
        stats.entries_applied += 1;

        for page in &entry.dirty_pages {
            let start = HiveImage::page_position(page.offset);
            if start.saturating_add(page.data.len()) > max_hive_size {
                warn!(
                    offset = %format!("{:#x}", page.offset),
                    size = page.data.len(),
                    "Dirty page would exceed maximum hive size"
                );
                continue;
            }
            if image.write_page(start, &page.data) {
                stats.pages_applied += 1;
            }
        }

        if newest.map_or(true, |(seq, _)| entry.sequence >= seq) {
            newest = Some((entry.sequence, entry.hive_bins_size));
        }
    }

    if stats.applied() {
        let hint = newest.map(|(_, size)| size).filter(|&size| size > 0);
        if let Err(e) = image.refresh_header(hint) {
            warn!(error = %e, "Header re-parse after replay failed");
        }
        info!(
            entries = stats.entries_applied,
            pages = stats.pages_applied,
            "Applied transaction log entries"
        );
    }

    stats
}
