//! The reader engine: locates the central directory, parses it into an
//! ordered entry list, and decompresses entries on demand.

use std::fs::File;
use std::io::{BufReader, Cursor, Read, Seek, SeekFrom};
use std::path::Path;

use flate2::read::DeflateDecoder;
use std::collections::HashMap;

use crate::error::{Result, SZipError};
use crate::primitives::{crc32, DosDateTime};
use crate::structures::{
    CentralDirectoryHeader, DataDescriptor, EndOfCentralDirectory, LocalFileHeader,
    Zip64EndOfCentralDirectory, Zip64ExtraField, Zip64Locator, FLAG_DATA_DESCRIPTOR,
    FLAG_ENCRYPTED, FLAG_STRONG_ENCRYPTION, METHOD_DEFLATE, METHOD_STORED, SENTINEL_32,
};

/// Largest comment an EOCD record can carry (a `u16` length field), plus the
/// 22-byte fixed EOCD body itself.
const EOCD_MAX_SCAN: u64 = 65557;

/// Central directories larger than this many records are rejected before
/// the parse loop runs, bounding worst-case memory use on hostile input.
const MAX_ENTRY_COUNT: u64 = 10_000_000;

/// Metadata for one entry in the archive's central directory.
#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub is_dir: bool,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
    pub crc32: u32,
    pub compression_method: u16,
    pub flags: u16,
    pub modified: DosDateTime,
    pub comment: String,
    local_header_offset: u64,
}

impl Entry {
    pub fn compressed_size(&self) -> u64 {
        self.compressed_size
    }

    pub fn uncompressed_size(&self) -> u64 {
        self.uncompressed_size
    }
}

/// A ZIP (or ZIP64) archive opened for reading.
///
/// The full central directory is parsed eagerly on open, into an ordered
/// `Vec<Entry>` plus a name index, so [`ZipArchive::list`] preserves on-disk
/// order and [`ZipArchive::open_entry`] is an O(1) lookup. Entry payloads
/// are decompressed lazily, on each call to `open_entry`.
pub struct ZipArchive<R> {
    reader: Option<R>,
    entries: Vec<Entry>,
    index: HashMap<String, usize>,
    closed: bool,
}

impl ZipArchive<BufReader<File>> {
    /// Open a ZIP archive from a path on disk.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        Self::with_reader(BufReader::new(file))
    }
}

impl<R: Read + Seek> ZipArchive<R> {
    /// Open a ZIP archive from an arbitrary seekable reader.
    pub fn with_reader(mut reader: R) -> Result<Self> {
        let result = Self::parse_archive(&mut reader);
        match result {
            Ok((entries, index)) => Ok(ZipArchive {
                reader: Some(reader),
                entries,
                index,
                closed: false,
            }),
            Err(e) => Err(e),
        }
    }

    fn parse_archive(reader: &mut R) -> Result<(Vec<Entry>, HashMap<String, usize>)> {
        let file_size = reader.seek(SeekFrom::End(0))?;
        let (eocd, zip64_eocd) = Self::find_eocd(reader, file_size)?;
        Self::parse_central_directory(reader, file_size, &eocd, zip64_eocd.as_ref())
    }

    /// Scan backward from the end of the stream for the EOCD signature,
    /// taking the rightmost match so a crafted archive comment containing
    /// the signature bytes cannot be mistaken for the real record.
    fn find_eocd(reader: &mut R, file_size: u64) -> Result<(EndOfCentralDirectory, Option<Zip64EndOfCentralDirectory>)> {
        let max_scan = EOCD_MAX_SCAN.min(file_size);
        let scan_start = file_size - max_scan;
        reader.seek(SeekFrom::Start(scan_start))?;
        let mut tail = vec![0u8; max_scan as usize];
        reader.read_exact(&mut tail)?;

        let eocd_pos_in_tail = tail
            .windows(4)
            .rposition(|w| w == [0x50, 0x4b, 0x05, 0x06])
            .ok_or_else(|| SZipError::FormatError("end of central directory record not found".to_string()))?;
        let eocd_offset = scan_start + eocd_pos_in_tail as u64;

        let mut zip64_eocd = None;
        if eocd_offset >= Zip64Locator::SIZE_ON_DISK {
            let locator_offset = eocd_offset - Zip64Locator::SIZE_ON_DISK;
            reader.seek(SeekFrom::Start(locator_offset))?;
            if let Some(locator) = Zip64Locator::try_parse(reader)? {
                log::trace!("ZIP64 locator found at offset {}", locator_offset);
                if locator.zip64_eocd_offset >= file_size {
                    return Err(SZipError::FormatError(format!(
                        "ZIP64 end of central directory offset {} is beyond archive size {}",
                        locator.zip64_eocd_offset, file_size
                    )));
                }
                reader.seek(SeekFrom::Start(locator.zip64_eocd_offset))?;
                zip64_eocd = Some(Zip64EndOfCentralDirectory::parse(reader)?);
            }
        }

        reader.seek(SeekFrom::Start(eocd_offset))?;
        let eocd = EndOfCentralDirectory::parse(reader)?;
        Ok((eocd, zip64_eocd))
    }

    fn parse_central_directory(
        reader: &mut R,
        file_size: u64,
        eocd: &EndOfCentralDirectory,
        zip64_eocd: Option<&Zip64EndOfCentralDirectory>,
    ) -> Result<(Vec<Entry>, HashMap<String, usize>)> {
        let (cd_offset, cd_size, num_entries) = match zip64_eocd {
            Some(z) => (z.cd_offset, z.cd_size, z.cd_entries_total),
            None => (
                eocd.cd_offset as u64,
                eocd.cd_size as u64,
                eocd.cd_entries_total as u64,
            ),
        };

        if num_entries > MAX_ENTRY_COUNT {
            return Err(SZipError::FormatError(format!(
                "entry count too large: {} (max {})",
                num_entries, MAX_ENTRY_COUNT
            )));
        }
        if cd_offset >= file_size {
            return Err(SZipError::FormatError(format!(
                "central directory offset {} is beyond archive size {}",
                cd_offset, file_size
            )));
        }
        if cd_offset + cd_size > file_size {
            return Err(SZipError::FormatError(format!(
                "central directory extends beyond archive: offset {}, size {} (archive size {})",
                cd_offset, cd_size, file_size
            )));
        }

        reader.seek(SeekFrom::Start(cd_offset))?;

        let mut entries: Vec<Entry> = Vec::with_capacity(num_entries.min(1_000_000) as usize);
        let mut index = HashMap::with_capacity(entries.capacity());
        let mut parsed_count: u64 = 0;

        for _ in 0..num_entries {
            let header = CentralDirectoryHeader::parse(reader)?;
            parsed_count += 1;
            let name = decode_name(&header.flags, &header.filename);
            let is_dir = name.ends_with('/') || (header.external_attrs >> 16) & 0o040000 != 0;
            let zip64_extra = Zip64ExtraField::find_in(&header.extra);

            let uncompressed_size = resolve_size(header.uncompressed_size, zip64_extra.and_then(|z| z.uncompressed_size));
            let compressed_size = resolve_size(header.compressed_size, zip64_extra.and_then(|z| z.compressed_size));
            let local_header_offset = resolve_size(header.local_header_offset, zip64_extra.and_then(|z| z.local_header_offset));

            let comment = String::from_utf8_lossy(&header.comment).into_owned();
            let modified = DosDateTime::from_dos(header.mod_date, header.mod_time);

            let entry = Entry {
                name: name.clone(),
                is_dir,
                compressed_size,
                uncompressed_size,
                crc32: header.crc32,
                compression_method: header.method,
                flags: header.flags,
                modified,
                comment,
                local_header_offset,
            };

            // A duplicate name collapses to one `Entry`, at the position of
            // its *first* occurrence, holding the *last* occurrence's data --
            // matching an insertion-ordered map keyed by name rather than a
            // flat per-record list.
            match index.get(&name) {
                Some(&existing) => entries[existing] = entry,
                None => {
                    index.insert(name, entries.len());
                    entries.push(entry);
                }
            }
        }

        if parsed_count != num_entries {
            return Err(SZipError::FormatError(format!(
                "entry count mismatch: expected {}, parsed {}",
                num_entries, parsed_count
            )));
        }

        Ok((entries, index))
    }

    /// List entry names in on-disk central-directory order, deduped by
    /// name: a duplicate name appears once, at its first occurrence's
    /// position.
    pub fn list(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.name.as_str()).collect()
    }

    /// Look up an entry's metadata without decompressing its payload.
    pub fn get_info(&self, name: &str) -> Option<&Entry> {
        let name = normalize_name(name);
        self.index.get(name.as_ref()).map(|&i| &self.entries[i])
    }

    /// Decompress an entry and verify its CRC-32.
    ///
    /// Directory entries return an empty buffer without touching the
    /// underlying reader.
    pub fn open_entry(&mut self, name: &str) -> Result<Vec<u8>> {
        if self.closed {
            return Err(SZipError::FormatError("archive is closed".to_string()));
        }
        let name = normalize_name(name);
        let &index = self
            .index
            .get(name.as_ref())
            .ok_or_else(|| SZipError::EntryNotFound(name.into_owned()))?;
        let entry = self.entries[index].clone();

        if entry.is_dir {
            return Ok(Vec::new());
        }

        log::trace!("opening entry {:?}", entry.name);

        let reader = self
            .reader
            .as_mut()
            .ok_or_else(|| SZipError::FormatError("archive is closed".to_string()))?;

        let data = decompress_entry(reader, &entry)?;

        let actual_crc = crc32(&data);
        if actual_crc != entry.crc32 {
            return Err(SZipError::CrcError {
                expected: entry.crc32,
                actual: actual_crc,
            });
        }

        Ok(data)
    }

    /// Release the underlying reader. Idempotent: calling this more than
    /// once, or after a failed open, is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.reader = None;
        self.closed = true;
    }
}

fn decompress_entry<R: Read + Seek>(reader: &mut R, entry: &Entry) -> Result<Vec<u8>> {
    if entry.flags & FLAG_ENCRYPTED != 0 || entry.flags & FLAG_STRONG_ENCRYPTION != 0 {
        return Err(SZipError::UnsupportedFeature(format!(
            "entry '{}' is encrypted",
            entry.name
        )));
    }

    let file_size = reader.seek(SeekFrom::End(0))?;
    if entry.local_header_offset >= file_size {
        return Err(SZipError::FormatError(format!(
            "local header offset {} for entry '{}' is beyond archive size {}",
            entry.local_header_offset, entry.name, file_size
        )));
    }
    reader.seek(SeekFrom::Start(entry.local_header_offset))?;
    let local_header = LocalFileHeader::parse(reader)?;

    let has_data_descriptor = local_header.flags & FLAG_DATA_DESCRIPTOR != 0;
    let local_zip64_extra = Zip64ExtraField::find_in(&local_header.extra);

    let actual_compressed_size = if has_data_descriptor {
        entry.compressed_size
    } else if let Some(size) = local_zip64_extra.and_then(|z| z.compressed_size) {
        size
    } else if local_header.compressed_size == SENTINEL_32 {
        entry.compressed_size
    } else {
        local_header.compressed_size as u64
    };

    let current_pos = reader.stream_position()?;
    if current_pos + actual_compressed_size > file_size {
        return Err(SZipError::FormatError(format!(
            "compressed data for entry '{}' extends beyond archive: position {}, size {} (archive size {})",
            entry.name, current_pos, actual_compressed_size, file_size
        )));
    }

    let mut compressed_data = vec![0u8; actual_compressed_size as usize];
    reader.read_exact(&mut compressed_data)?;

    if has_data_descriptor {
        let is_zip64_descriptor = entry.compressed_size > u32::MAX as u64 || entry.uncompressed_size > u32::MAX as u64;
        let descriptor_size = DataDescriptor::size_on_disk(is_zip64_descriptor);
        let pos = reader.stream_position()?;
        if pos + descriptor_size <= file_size {
            // Sizes are already authoritative from the central directory; this
            // read exists only to leave the stream positioned past the record.
            let _ = DataDescriptor::parse(reader, is_zip64_descriptor);
        }
    }

    match entry.compression_method {
        METHOD_STORED => Ok(compressed_data),
        METHOD_DEFLATE => {
            let mut decoder = DeflateDecoder::new(Cursor::new(&compressed_data));
            let mut data = Vec::with_capacity(entry.uncompressed_size as usize);
            decoder
                .read_to_end(&mut data)
                .map_err(|e| SZipError::CompressionError(format!("deflate decompression failed: {}", e)))?;
            Ok(data)
        }
        other => Err(SZipError::UnsupportedFeature(format!(
            "unsupported compression method {} for entry '{}'",
            other, entry.name
        ))),
    }
}

/// Prefer the central-directory field unless it is the ZIP64 sentinel, in
/// which case the corresponding ZIP64 extra-field value (if present) wins.
fn resolve_size(classic: u32, zip64: Option<u64>) -> u64 {
    if classic == SENTINEL_32 {
        zip64.unwrap_or(classic as u64)
    } else {
        classic as u64
    }
}

/// Decode a filename as UTF-8 regardless of the flag-bit-11 state: real
/// archives often mislabel encoding, so the flag is advisory, not trusted.
/// Invalid sequences are replaced rather than rejected.
fn decode_name(_flags: &u16, raw: &[u8]) -> String {
    let name = String::from_utf8_lossy(raw).into_owned();
    if name.contains('\\') {
        name.replace('\\', "/")
    } else {
        name
    }
}

fn normalize_name(name: &str) -> std::borrow::Cow<'_, str> {
    if name.contains('\\') {
        std::borrow::Cow::Owned(name.replace('\\', "/"))
    } else {
        std::borrow::Cow::Borrowed(name)
    }
}
