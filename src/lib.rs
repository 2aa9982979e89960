//! # pkzip-core: A ZIP/ZIP64 archive reader and writer
//!
//! `pkzip-core` reads and writes PKZIP archives, including the ZIP64
//! extensions for archives, entries, or entry counts beyond the classic
//! 32-bit limits. It favors a small, predictable core over broad feature
//! coverage: no encryption, no multi-disk archives, no compression methods
//! beyond STORED and DEFLATE.
//!
//! ## Reading an archive
//!
//! ```no_run
//! use pkzip_core::ZipArchive;
//!
//! let mut archive = ZipArchive::open("archive.zip")?;
//! for name in archive.list() {
//!     println!("{}", name);
//! }
//! let data = archive.open_entry("file.txt")?;
//! # Ok::<(), pkzip_core::SZipError>(())
//! ```
//!
//! ## Writing an archive
//!
//! ```no_run
//! use pkzip_core::ZipWriter;
//!
//! let mut writer = ZipWriter::create("output.zip")?;
//! writer.add_bytes("file1.txt", b"Hello, World!")?;
//! writer.add_bytes("file2.txt", b"Another file")?;
//! writer.close()?;
//! # Ok::<(), pkzip_core::SZipError>(())
//! ```

pub mod error;
pub mod primitives;
pub mod reader;
pub mod structures;
pub mod writer;

pub use error::{Result, SZipError};
pub use primitives::DosDateTime;
pub use reader::{Entry, ZipArchive};
pub use writer::{CompressionMethod, ZipWriter};
