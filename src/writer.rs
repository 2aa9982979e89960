//! The writer engine: buffers entry metadata as bytes are added, then emits
//! local headers, central directory, and the (possibly ZIP64) EOCD on close.

use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::Path;

use flate2::write::DeflateEncoder;
use flate2::Compression;

use crate::error::{Result, SZipError};
use crate::primitives::{crc32, DosDateTime};
use crate::structures::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64ExtraField, Zip64Locator, FLAG_DATA_DESCRIPTOR, FLAG_UTF8,
    METHOD_DEFLATE, METHOD_STORED, SENTINEL_16, SENTINEL_32, VERSION_DEFAULT, VERSION_MADE_BY_UNIX,
    VERSION_ZIP64,
};

/// Compression method requested for an entry being added.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    Stored,
    Deflate,
}

const MAX_NAME_LEN: usize = 255;

struct PendingEntry {
    name: String,
    compressed_data: Vec<u8>,
    uncompressed_size: u64,
    crc32: u32,
    compression_method: u16,
    mod_time: u16,
    mod_date: u16,
    flags: u16,
    local_header_offset: u64,
}

/// A ZIP (or ZIP64) archive under construction.
///
/// Entries are buffered in memory, one local header and payload per
/// `add_*` call, and the central directory is emitted only once the caller
/// calls [`ZipWriter::close`]. ZIP64 is decided per-field: an individual
/// entry's header goes ZIP64 only if one of its own sizes or its offset
/// overflows 32 bits; the archive's EOCD goes ZIP64 if any entry did, or if
/// the entry count or the central directory itself overflows.
pub struct ZipWriter<W> {
    writer: Option<W>,
    pending: Vec<PendingEntry>,
    current_offset: u64,
    closed: bool,
}

impl ZipWriter<BufWriter<File>> {
    /// Create a new archive at the given path, truncating it if it exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::create(path)?;
        Self::with_writer(BufWriter::new(file))
    }
}

impl<W: Write> ZipWriter<W> {
    /// Create a new archive writing to an arbitrary sink.
    pub fn with_writer(writer: W) -> Result<Self> {
        Ok(ZipWriter {
            writer: Some(writer),
            pending: Vec::new(),
            current_offset: 0,
            closed: false,
        })
    }

    /// Add an entry from an in-memory buffer, deflate-compressed.
    pub fn add_bytes(&mut self, name: &str, data: &[u8]) -> Result<()> {
        self.add_bytes_with(name, data, CompressionMethod::Deflate, false)
    }

    /// Add an entry from an in-memory buffer with an explicit compression
    /// method and data-descriptor preference.
    pub fn add_bytes_with(
        &mut self,
        name: &str,
        data: &[u8],
        method: CompressionMethod,
        use_data_descriptor: bool,
    ) -> Result<()> {
        if self.closed {
            return Err(SZipError::FormatError("archive is closed".to_string()));
        }
        let name = validate_and_normalize_name(name)?;

        let entry_crc32 = crc32(data);
        let compressed_data = compress(data, method)?;
        let (mod_date, mod_time) = DosDateTime::now().to_dos()?;
        let local_header_offset = self.current_offset;

        let mut flags = FLAG_UTF8;
        if use_data_descriptor {
            flags |= FLAG_DATA_DESCRIPTOR;
        }

        let writer = self.writer.as_mut().ok_or_else(|| SZipError::FormatError("archive is closed".to_string()))?;

        let uncompressed_size = data.len() as u64;
        let compressed_size = compressed_data.len() as u64;
        let needs_zip64 = uncompressed_size > SENTINEL_32 as u64
            || compressed_size > SENTINEL_32 as u64
            || local_header_offset > SENTINEL_32 as u64;

        if needs_zip64 {
            log::debug!("entry '{}' promoted to ZIP64", name);
        }
        log::trace!("adding entry '{}' ({} bytes compressed)", name, compressed_data.len());

        let extra_len = if use_data_descriptor {
            let needs_zip64_offset = local_header_offset > SENTINEL_32 as u64;
            write_local_header_with_data_descriptor(writer, &name, method_code(method), mod_time, mod_date, flags, local_header_offset)?;
            if needs_zip64_offset {
                28 // tag(2) + size(2) + uncompressed(8) + compressed(8) + offset(8)
            } else {
                0
            }
        } else {
            write_local_header(
                writer,
                &name,
                method_code(method),
                mod_time,
                mod_date,
                entry_crc32,
                compressed_size,
                uncompressed_size,
                local_header_offset,
                needs_zip64,
            )?;
            if needs_zip64 {
                28 // tag(2) + size(2) + uncompressed(8) + compressed(8) + offset(8)
            } else {
                0
            }
        };
        self.current_offset += 30 + name.len() as u64 + extra_len;

        writer.write_all(&compressed_data)?;
        self.current_offset += compressed_data.len() as u64;

        if use_data_descriptor {
            let is_zip64_descriptor = compressed_size > SENTINEL_32 as u64 || uncompressed_size > SENTINEL_32 as u64;
            DataDescriptor::write(writer, entry_crc32, compressed_size, uncompressed_size, is_zip64_descriptor)?;
            self.current_offset += DataDescriptor::size_on_disk(is_zip64_descriptor);
        }

        self.pending.push(PendingEntry {
            name,
            compressed_data,
            uncompressed_size,
            crc32: entry_crc32,
            compression_method: method_code(method),
            mod_time,
            mod_date,
            flags,
            local_header_offset,
        });

        Ok(())
    }

    /// Add an entry by reading an entire file from disk into memory.
    pub fn add_file<P: AsRef<Path>>(&mut self, name_in_zip: &str, source_path: P, method: CompressionMethod) -> Result<()> {
        if self.closed {
            return Err(SZipError::FormatError("archive is closed".to_string()));
        }
        let mut file = File::open(source_path).map_err(|e| SZipError::FormatError(format!("reading source file: {}", e)))?;
        let mut data = Vec::new();
        file.read_to_end(&mut data).map_err(|e| SZipError::FormatError(format!("reading source file: {}", e)))?;
        self.add_bytes_with(name_in_zip, &data, method, false)
    }

    /// Add an entry by reading an unsized stream to completion, using a
    /// data descriptor since the final size is unknown up front.
    pub fn add_stream<R: Read>(&mut self, name: &str, mut stream: R, method: CompressionMethod) -> Result<()> {
        if self.closed {
            return Err(SZipError::FormatError("archive is closed".to_string()));
        }
        let mut data = Vec::new();
        stream
            .read_to_end(&mut data)
            .map_err(|e| SZipError::FormatError(format!("reading source stream: {}", e)))?;
        self.add_bytes_with(name, &data, method, true)
    }

    /// Write the central directory and (possibly ZIP64) end-of-central-directory
    /// records, then consume the writer. Idempotent in the sense that once
    /// finalization has run once on this value, the value is gone — callers
    /// cannot double-close by construction.
    pub fn close(mut self) -> Result<()> {
        self.finalize()
    }

    fn finalize(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let writer = self.writer.take().ok_or_else(|| SZipError::FormatError("archive is closed".to_string()))?;
        let mut writer = writer;

        let (cd_offset, cd_size) = self.write_central_directory(&mut writer)?;
        self.write_eocd(&mut writer, cd_offset, cd_size)?;
        writer.flush()?;
        Ok(())
    }

    fn write_central_directory(&mut self, writer: &mut W) -> Result<(u64, u64)> {
        let cd_start = self.current_offset;

        for entry in &self.pending {
            let needs_zip64 = entry.uncompressed_size > SENTINEL_32 as u64
                || entry.compressed_size() > SENTINEL_32 as u64
                || entry.local_header_offset > SENTINEL_32 as u64;

            let (extra, stored_compressed, stored_uncompressed, stored_offset) = if needs_zip64 {
                let extra = Zip64ExtraField::build(
                    Some(entry.uncompressed_size),
                    Some(entry.compressed_size()),
                    Some(entry.local_header_offset),
                );
                (extra, SENTINEL_32, SENTINEL_32, SENTINEL_32)
            } else {
                (Vec::new(), entry.compressed_size() as u32, entry.uncompressed_size as u32, entry.local_header_offset as u32)
            };

            let external_attrs = if entry.name.ends_with('/') {
                0o040755u32 << 16
            } else {
                0o100644u32 << 16
            };
            let version_needed = if needs_zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

            CentralDirectoryHeader::write(
                writer,
                VERSION_MADE_BY_UNIX,
                version_needed,
                entry.flags,
                entry.compression_method,
                entry.mod_time,
                entry.mod_date,
                entry.crc32,
                stored_compressed,
                stored_uncompressed,
                external_attrs,
                stored_offset,
                entry.name.as_bytes(),
                &extra,
            )?;

            self.current_offset += 46 + entry.name.len() as u64 + extra.len() as u64;
        }

        Ok((cd_start, self.current_offset - cd_start))
    }

    fn write_eocd(&mut self, writer: &mut W, cd_offset: u64, cd_size: u64) -> Result<()> {
        let num_entries = self.pending.len() as u64;
        let needs_zip64 = self.pending.iter().any(|e| {
            e.uncompressed_size > SENTINEL_32 as u64 || e.compressed_size() > SENTINEL_32 as u64 || e.local_header_offset > SENTINEL_32 as u64
        }) || num_entries > SENTINEL_16 as u64
            || cd_size > SENTINEL_32 as u64
            || cd_offset > SENTINEL_32 as u64;

        if needs_zip64 {
            log::debug!("archive promoted to ZIP64: {} entries, central directory size {}", num_entries, cd_size);
            let zip64_eocd_offset = self.current_offset;
            Zip64EndOfCentralDirectory::write(writer, num_entries, cd_size, cd_offset)?;
            self.current_offset += Zip64EndOfCentralDirectory::FIXED_SIZE_ON_DISK;

            Zip64Locator::write(writer, zip64_eocd_offset)?;
            self.current_offset += Zip64Locator::SIZE_ON_DISK;

            EndOfCentralDirectory::write(writer, SENTINEL_16, SENTINEL_32, SENTINEL_32)?;
        } else {
            EndOfCentralDirectory::write(writer, num_entries as u16, cd_size as u32, cd_offset as u32)?;
        }

        Ok(())
    }
}

impl PendingEntry {
    fn compressed_size(&self) -> u64 {
        self.compressed_data.len() as u64
    }
}

fn method_code(method: CompressionMethod) -> u16 {
    match method {
        CompressionMethod::Stored => METHOD_STORED,
        CompressionMethod::Deflate => METHOD_DEFLATE,
    }
}

fn compress(data: &[u8], method: CompressionMethod) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::Stored => Ok(data.to_vec()),
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(data)
                .map_err(|e| SZipError::CompressionError(format!("deflate compression failed: {}", e)))?;
            encoder
                .finish()
                .map_err(|e| SZipError::CompressionError(format!("deflate compression failed: {}", e)))
        }
    }
}

fn validate_and_normalize_name(name: &str) -> Result<String> {
    let name = if name.contains('\\') { name.replace('\\', "/") } else { name.to_string() };
    if name.is_empty() {
        return Err(SZipError::FormatError("entry name cannot be empty".to_string()));
    }
    if name.as_bytes().len() > MAX_NAME_LEN {
        return Err(SZipError::FormatError(format!(
            "entry name too long: {} bytes (max {} bytes)",
            name.as_bytes().len(),
            MAX_NAME_LEN
        )));
    }
    if name.contains('\0') {
        return Err(SZipError::FormatError("entry name cannot contain NUL bytes".to_string()));
    }
    Ok(name)
}

#[allow(clippy::too_many_arguments)]
fn write_local_header<W: Write>(
    writer: &mut W,
    name: &str,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    crc32: u32,
    compressed_size: u64,
    uncompressed_size: u64,
    local_header_offset: u64,
    needs_zip64: bool,
) -> Result<()> {
    let (extra, stored_compressed, stored_uncompressed) = if needs_zip64 {
        (
            Zip64ExtraField::build(Some(uncompressed_size), Some(compressed_size), Some(local_header_offset)),
            SENTINEL_32,
            SENTINEL_32,
        )
    } else {
        (Vec::new(), compressed_size as u32, uncompressed_size as u32)
    };
    let version_needed = if needs_zip64 { VERSION_ZIP64 } else { VERSION_DEFAULT };

    LocalFileHeader::write(
        writer,
        version_needed,
        FLAG_UTF8,
        method,
        mod_time,
        mod_date,
        crc32,
        stored_compressed,
        stored_uncompressed,
        name.as_bytes(),
        &extra,
    )
}

fn write_local_header_with_data_descriptor<W: Write>(
    writer: &mut W,
    name: &str,
    method: u16,
    mod_time: u16,
    mod_date: u16,
    flags: u16,
    local_header_offset: u64,
) -> Result<()> {
    // Sizes are unknown up front; the trailing data descriptor carries them.
    // ZIP64 is only needed here if the offset itself has already overflowed.
    // The extra field is read positionally (uncompressed, compressed, offset),
    // so the two unknown sizes must be zero-padded rather than omitted --
    // omitting them would shift the offset into the uncompressed-size slot.
    let needs_zip64_offset = local_header_offset > SENTINEL_32 as u64;
    let extra = if needs_zip64_offset {
        Zip64ExtraField::build(Some(0), Some(0), Some(local_header_offset))
    } else {
        Vec::new()
    };
    let version_needed = if needs_zip64_offset { VERSION_ZIP64 } else { VERSION_DEFAULT };

    LocalFileHeader::write(writer, version_needed, flags, method, mod_time, mod_date, 0, 0, 0, name.as_bytes(), &extra)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::ZipArchive;
    use std::io::Cursor;

    #[test]
    fn round_trips_single_entry() {
        let mut buf = Vec::new();
        {
            let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
            writer.add_bytes("hello.txt", b"hello world").unwrap();
            writer.close().unwrap();
        }
        let mut archive = ZipArchive::with_reader(Cursor::new(buf)).unwrap();
        assert_eq!(archive.open_entry("hello.txt").unwrap(), b"hello world");
    }

    #[test]
    fn stored_entry_round_trips() {
        let mut buf = Vec::new();
        {
            let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
            writer.add_bytes_with("raw.bin", b"\x00\x01\x02raw", CompressionMethod::Stored, false).unwrap();
            writer.close().unwrap();
        }
        let mut archive = ZipArchive::with_reader(Cursor::new(buf)).unwrap();
        assert_eq!(archive.open_entry("raw.bin").unwrap(), b"\x00\x01\x02raw");
    }

    #[test]
    fn data_descriptor_variant_round_trips() {
        let mut buf = Vec::new();
        {
            let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
            writer
                .add_stream("streamed.txt", Cursor::new(b"streamed contents".to_vec()), CompressionMethod::Deflate)
                .unwrap();
            writer.close().unwrap();
        }
        let mut archive = ZipArchive::with_reader(Cursor::new(buf)).unwrap();
        assert_eq!(archive.open_entry("streamed.txt").unwrap(), b"streamed contents");
    }

    #[test]
    fn rejects_empty_name() {
        let mut buf = Vec::new();
        let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
        let err = writer.add_bytes("", b"data").unwrap_err();
        assert!(matches!(err, SZipError::FormatError(_)));
    }

    #[test]
    fn rejects_oversize_name() {
        let mut buf = Vec::new();
        let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
        let long_name = "a".repeat(300);
        let err = writer.add_bytes(&long_name, b"data").unwrap_err();
        assert!(matches!(err, SZipError::FormatError(_)));
    }

    #[test]
    fn multiple_entries_preserve_order_and_content() {
        let mut buf = Vec::new();
        {
            let mut writer = ZipWriter::with_writer(Cursor::new(&mut buf)).unwrap();
            writer.add_bytes("a.txt", b"AAA").unwrap();
            writer.add_bytes("b.txt", b"BBB").unwrap();
            writer.add_bytes("c.txt", b"CCC").unwrap();
            writer.close().unwrap();
        }
        let mut archive = ZipArchive::with_reader(Cursor::new(buf)).unwrap();
        assert_eq!(archive.list(), vec!["a.txt", "b.txt", "c.txt"]);
        assert_eq!(archive.open_entry("b.txt").unwrap(), b"BBB");
    }
}
