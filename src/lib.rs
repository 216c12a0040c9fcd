//! # regf-recover
//!
//! A read-only decoder for Windows registry hive files (REGF) that replays
//! sibling transaction logs before exposing keys and values.
//!
//! ## Features
//!
//! - **Recovery first**: dirty pages from `.LOG`, `.LOG1` and `.LOG2` files
//!   newer than the hive are applied to an in-memory copy before any lookup
//! - **Tolerant decoding**: damaged offsets, foreign cells and cyclic lists
//!   degrade to "not found" instead of failing the whole hive
//! - **All list shapes**: lf, lh, li and nested ri subkey lists
//! - **Big data**: values over 16 KB assembled from db segments
//! - **Owned snapshots**: keys and values are plain data, safe to keep after
//!   the hive is dropped
//!
//! ## On-disk pieces
//!
//! ```text
//! hive file   0x0000  base block: "regf", two sequence numbers, root cell,
//!                     bins size, checksum at 0x1FC
//!             0x1000  bins: size-prefixed cells (nk, vk, lf/lh/li/ri, db, sk);
//!                     a negative size marks the cell in use
//! .LOG1/.LOG2 0x0000  a base block of its own
//!             0x1000  "HvLE" entries: sequence, bins size, page references,
//!                     then the page bytes to copy into the bins
//! ```
//!
//! ## Examples
//!
//! ```no_run
//! use regf_recover::Hive;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let hive = Hive::open("SYSTEM")?;
//! if hive.transaction_logs_applied() {
//!     println!("recovered {:?}", hive.replay_stats());
//! }
//!
//! for key in hive.iter() {
//!     println!("{}", key.path());
//!     for value in key.values() {
//!         println!("  {} = {}", value.name(), value.data());
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! Loading through the stateful facade:
//!
//! ```no_run
//! use regf_recover::HiveParser;
//!
//! let mut parser = HiveParser::new();
//! if !parser.load("NTUSER.DAT") {
//!     eprintln!("load failed: {:?}", parser.last_error());
//! } else if let Some(run) = parser.get_key("Software\\Microsoft\\Windows\\CurrentVersion\\Run") {
//!     println!("{} autoruns", run.value_count());
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bigdata;
pub mod cell;
pub mod error;
pub mod header;
pub mod hive;
pub mod image;
pub mod key;
pub mod parser;
pub mod subkey_list;
pub mod transaction_log;
pub mod utils;
pub mod value;

pub use cell::{Cell, CellType, KeyNodeFlags, ValueType};
pub use error::{ErrorKind, RegistryError, Result};
pub use header::BaseBlock;
pub use hive::{Hive, KeyIter, LoadOptions, RegKey, RegValue};
pub use image::HiveImage;
pub use key::KeyNode;
pub use parser::HiveParser;
pub use subkey_list::{SubkeyList, SubkeyListEntry, SubkeyListType, SubkeyWalk};
pub use transaction_log::{DirtyPage, LogEntry, ReplayStats, TransactionLog};
pub use value::{ValueData, ValueKey};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
