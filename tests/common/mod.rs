//! Synthetic hive and transaction log writer shared by the integration tests.

#![allow(dead_code)]

use regf_recover::utils::calculate_checksum;

pub const NULL: u32 = 0xFFFF_FFFF;

/// 2021-01-01T00:00:00Z as a FILETIME.
pub const TIMESTAMP_2021: u64 = 132_539_328_000_000_000;

pub const REG_SZ: u32 = 1;
pub const REG_EXPAND_SZ: u32 = 2;
pub const REG_BINARY: u32 = 3;
pub const REG_DWORD: u32 = 4;
pub const REG_DWORD_BIG_ENDIAN: u32 = 5;
pub const REG_MULTI_SZ: u32 = 7;
pub const REG_QWORD: u32 = 11;

const BASE_BLOCK_SIZE: usize = 4096;
const HBIN_HEADER_SIZE: usize = 0x20;
const PAGE_SIZE: usize = 0x1000;
const SEGMENT_SIZE: usize = 16344;

const KEY_COMP_NAME: u16 = 0x0020;
const KEY_ROOT: u16 = 0x0004;

/// Writes a single-bin hive. Cells are appended in allocation order; all
/// offsets returned are relative to the first hive bin.
pub struct HiveBuilder {
    bins: Vec<u8>,
    root: u32,
    primary: u32,
    secondary: u32,
}

impl Default for HiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl HiveBuilder {
    pub fn new() -> Self {
        let mut bins = vec![0u8; HBIN_HEADER_SIZE];
        bins[0..4].copy_from_slice(b"hbin");
        Self {
            bins,
            root: NULL,
            primary: 1,
            secondary: 1,
        }
    }

    pub fn sequences(&mut self, primary: u32, secondary: u32) -> &mut Self {
        self.primary = primary;
        self.secondary = secondary;
        self
    }

    /// Appends an allocated cell holding `body`, padded to 8 bytes.
    pub fn alloc(&mut self, body: &[u8]) -> u32 {
        let offset = self.bins.len();
        let size = (body.len() + 4 + 7) & !7;
        self.bins.extend_from_slice(&(-(size as i32)).to_le_bytes());
        self.bins.extend_from_slice(body);
        self.bins.resize(offset + size, 0);
        offset as u32
    }

    /// Marks a cell as free by flipping its size to positive.
    pub fn free(&mut self, cell: u32) {
        let at = cell as usize;
        let raw = i32::from_le_bytes(self.bins[at..at + 4].try_into().unwrap());
        self.bins[at..at + 4].copy_from_slice(&raw.abs().to_le_bytes());
    }

    /// Overwrites bytes inside a cell body.
    pub fn patch(&mut self, cell: u32, field: usize, bytes: &[u8]) {
        let at = cell as usize + 4 + field;
        self.bins[at..at + bytes.len()].copy_from_slice(bytes);
    }

    pub fn patch_u32(&mut self, cell: u32, field: usize, value: u32) {
        self.patch(cell, field, &value.to_le_bytes());
    }

    fn key_cell(&mut self, flags: u16, name: &[u8], shifted: bool) -> u32 {
        let name_at = if shifted { 0x50 } else { 0x4C };
        let mut body = vec![0u8; name_at + name.len()];
        body[0..2].copy_from_slice(b"nk");
        body[2..4].copy_from_slice(&flags.to_le_bytes());
        body[4..12].copy_from_slice(&TIMESTAMP_2021.to_le_bytes());
        for field in [0x10, 0x1C, 0x20, 0x28, 0x2C, 0x30] {
            body[field..field + 4].copy_from_slice(&NULL.to_le_bytes());
        }
        body[name_at - 4..name_at - 2].copy_from_slice(&(name.len() as u16).to_le_bytes());
        body[name_at..].copy_from_slice(name);
        self.alloc(&body)
    }

    /// Key with a one-byte-per-character name.
    pub fn key(&mut self, name: &str) -> u32 {
        self.key_cell(KEY_COMP_NAME, name.as_bytes(), false)
    }

    /// Key with a UTF-16LE name given as raw code units.
    pub fn key_utf16(&mut self, units: &[u16]) -> u32 {
        let bytes: Vec<u8> = units.iter().flat_map(|u| u.to_le_bytes()).collect();
        self.key_cell(0, &bytes, false)
    }

    /// Key whose name length and name sit four bytes later than usual.
    pub fn key_shifted(&mut self, name: &str) -> u32 {
        self.key_cell(KEY_COMP_NAME, name.as_bytes(), true)
    }

    /// Root key; its offset goes into the base block.
    pub fn root(&mut self, name: &str) -> u32 {
        let key = self.key_cell(KEY_COMP_NAME | KEY_ROOT, name.as_bytes(), false);
        self.root = key;
        key
    }

    pub fn set_root(&mut self, offset: u32) {
        self.root = offset;
    }

    pub fn root_key_offset(&self) -> u32 {
        self.root
    }

    pub fn set_subkeys(&mut self, key: u32, list: u32, count: u32) {
        self.patch_u32(key, 0x14, count);
        self.patch_u32(key, 0x1C, list);
    }

    /// Subkey list cell. lf/lh elements carry a zero hint.
    pub fn list(&mut self, sig: &[u8; 2], offsets: &[u32]) -> u32 {
        let wide = sig == b"lf" || sig == b"lh";
        let mut body = Vec::new();
        body.extend_from_slice(sig);
        body.extend_from_slice(&(offsets.len() as u16).to_le_bytes());
        for offset in offsets {
            body.extend_from_slice(&offset.to_le_bytes());
            if wide {
                body.extend_from_slice(&0u32.to_le_bytes());
            }
        }
        self.alloc(&body)
    }

    /// Hangs `keys` under `parent` through a single leaf list.
    pub fn children(&mut self, parent: u32, sig: &[u8; 2], keys: &[u32]) -> u32 {
        let list = self.list(sig, keys);
        self.set_subkeys(parent, list, keys.len() as u32);
        list
    }

    /// Value node. Payloads up to four bytes are stored inline, payloads
    /// over 16344 bytes go through a db block.
    pub fn value(&mut self, name: &str, value_type: u32, data: &[u8]) -> u32 {
        let (size_raw, data_offset) = if data.len() <= 4 {
            let mut inline = [0u8; 4];
            inline[..data.len()].copy_from_slice(data);
            (0x8000_0000 | data.len() as u32, u32::from_le_bytes(inline))
        } else if data.len() > SEGMENT_SIZE {
            (data.len() as u32, self.big_data(data))
        } else {
            (data.len() as u32, self.alloc(data))
        };

        let mut body = vec![0u8; 0x14 + name.len()];
        body[0..2].copy_from_slice(b"vk");
        body[2..4].copy_from_slice(&(name.len() as u16).to_le_bytes());
        body[4..8].copy_from_slice(&size_raw.to_le_bytes());
        body[8..12].copy_from_slice(&data_offset.to_le_bytes());
        body[12..16].copy_from_slice(&value_type.to_le_bytes());
        body[16..18].copy_from_slice(&1u16.to_le_bytes());
        body[0x14..].copy_from_slice(name.as_bytes());
        self.alloc(&body)
    }

    fn big_data(&mut self, data: &[u8]) -> u32 {
        let segments: Vec<u32> = data.chunks(SEGMENT_SIZE).map(|chunk| self.alloc(chunk)).collect();
        let list: Vec<u8> = segments.iter().flat_map(|s| s.to_le_bytes()).collect();
        let list = self.alloc(&list);

        let mut db = Vec::new();
        db.extend_from_slice(b"db");
        db.extend_from_slice(&(segments.len() as u16).to_le_bytes());
        db.extend_from_slice(&list.to_le_bytes());
        self.alloc(&db)
    }

    pub fn set_values(&mut self, key: u32, values: &[u32]) {
        let list: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        let list = self.alloc(&list);
        self.patch_u32(key, 0x24, values.len() as u32);
        self.patch_u32(key, 0x28, list);
    }

    /// Size of the hive bins region once built.
    pub fn bins_size(&self) -> usize {
        ((self.bins.len() + PAGE_SIZE - 1) / PAGE_SIZE).max(1) * PAGE_SIZE
    }

    /// The hive bins region, padded to whole pages.
    pub fn bins(&self) -> Vec<u8> {
        let mut bins = self.bins.clone();
        let size = self.bins_size();
        bins.resize(size, 0);
        bins[8..12].copy_from_slice(&(size as u32).to_le_bytes());
        bins
    }

    /// The complete hive file.
    pub fn build(&self) -> Vec<u8> {
        let bins = self.bins();
        let mut data = base_block(self.primary, self.secondary, self.root, bins.len() as u32);
        data.extend_from_slice(&bins);
        data
    }
}

fn base_block(primary: u32, secondary: u32, root: u32, bins_size: u32) -> Vec<u8> {
    let mut block = vec![0u8; BASE_BLOCK_SIZE];
    block[0..4].copy_from_slice(b"regf");
    block[0x04..0x08].copy_from_slice(&primary.to_le_bytes());
    block[0x08..0x0C].copy_from_slice(&secondary.to_le_bytes());
    block[0x0C..0x14].copy_from_slice(&TIMESTAMP_2021.to_le_bytes());
    block[0x14..0x18].copy_from_slice(&1u32.to_le_bytes());
    block[0x18..0x1C].copy_from_slice(&5u32.to_le_bytes());
    block[0x20..0x24].copy_from_slice(&1u32.to_le_bytes());
    block[0x24..0x28].copy_from_slice(&root.to_le_bytes());
    block[0x28..0x2C].copy_from_slice(&bins_size.to_le_bytes());
    block[0x2C..0x30].copy_from_slice(&1u32.to_le_bytes());
    let name = utf16("SYSTEM");
    block[0x30..0x30 + name.len()].copy_from_slice(&name);
    let checksum = calculate_checksum(&block);
    block[0x1FC..0x200].copy_from_slice(&checksum.to_le_bytes());
    block
}

pub fn utf16(s: &str) -> Vec<u8> {
    s.encode_utf16().flat_map(|u| u.to_le_bytes()).collect()
}

/// UTF-16LE with a terminating NUL.
pub fn utf16z(s: &str) -> Vec<u8> {
    let mut data = utf16(s);
    data.extend_from_slice(&[0, 0]);
    data
}

pub fn multi_sz(strings: &[&str]) -> Vec<u8> {
    let mut data: Vec<u8> = strings.iter().flat_map(|s| utf16z(s)).collect();
    data.extend_from_slice(&[0, 0]);
    data
}

/// One `HvLE` entry with the given pages.
pub fn log_entry(sequence: u32, hive_bins_size: u32, pages: &[(u32, &[u8])]) -> Vec<u8> {
    let payload: usize = pages.iter().map(|(_, data)| data.len()).sum();
    let size = 40 + pages.len() * 8 + payload;
    let mut entry = Vec::with_capacity(size);
    entry.extend_from_slice(b"HvLE");
    entry.extend_from_slice(&(size as u32).to_le_bytes());
    entry.extend_from_slice(&0u32.to_le_bytes());
    entry.extend_from_slice(&sequence.to_le_bytes());
    entry.extend_from_slice(&hive_bins_size.to_le_bytes());
    entry.extend_from_slice(&(pages.len() as u32).to_le_bytes());
    entry.extend_from_slice(&[0u8; 16]);
    for (offset, data) in pages {
        entry.extend_from_slice(&offset.to_le_bytes());
        entry.extend_from_slice(&(data.len() as u32).to_le_bytes());
    }
    for (_, data) in pages {
        entry.extend_from_slice(data);
    }
    entry
}

/// A log file: base block followed by the given entries.
pub fn log_file(entries: &[Vec<u8>]) -> Vec<u8> {
    let mut data = base_block(1, 1, NULL, 0);
    for entry in entries {
        data.extend_from_slice(entry);
    }
    data
}

/// A small hive with every list shape and value type:
///
/// ```text
/// ROOT
///   Software              (lh)
///     Microsoft           (lf)
///       Windows           (li), eight values
///   System                (ri -> lf, lh)
///     ControlSet001
///     Select              Current = 1
/// ```
///
/// `count` is stored inline as the DWORD `Windows\Count`, so hives built
/// with different counts share one layout.
pub fn sample_hive(count: u32) -> HiveBuilder {
    let mut b = HiveBuilder::new();
    let root = b.root("ROOT");
    let software = b.key("Software");
    let system = b.key("System");
    b.children(root, b"lh", &[software, system]);

    let microsoft = b.key("Microsoft");
    b.children(software, b"lf", &[microsoft]);
    let windows = b.key("Windows");
    b.children(microsoft, b"li", &[windows]);

    let values = [
        b.value("", REG_SZ, &utf16z("default")),
        b.value("Path", REG_SZ, &utf16z("C:\\Windows")),
        b.value("Count", REG_DWORD, &count.to_le_bytes()),
        b.value("Big", REG_QWORD, &0x1234_5678_9ABC_DEF0u64.to_le_bytes()),
        b.value("List", REG_MULTI_SZ, &multi_sz(&["First", "Second", "Third"])),
        b.value("Blob", REG_BINARY, &[0xDE, 0xAD, 0xBE, 0xEF, 0x01]),
        b.value("Expand", REG_EXPAND_SZ, &utf16z("%SystemRoot%\\system32")),
        b.value("Network", REG_DWORD_BIG_ENDIAN, &42u32.to_be_bytes()),
    ];
    b.set_values(windows, &values);

    let control_set = b.key("ControlSet001");
    let select = b.key("Select");
    let current = b.value("Current", REG_DWORD, &1u32.to_le_bytes());
    b.set_values(select, &[current]);
    let lf = b.list(b"lf", &[control_set]);
    let lh = b.list(b"lh", &[select]);
    let ri = b.list(b"ri", &[lf, lh]);
    b.set_subkeys(system, ri, 2);

    b
}
