//! Pure parsers and serializers for PKZIP on-disk records.
//!
//! Every function here either reads a record from the current position of a
//! `Read` (and validates its signature), or serializes one into a `Write`.
//! None of them seek; the reader and writer engines own positioning.

use std::io::{Read, Write};

use crate::error::{Result, SZipError};
use crate::primitives::{read_exact_bytes, read_u16, read_u32, read_u64, write_bytes, write_u16, write_u32, write_u64};

pub const LOCAL_FILE_HEADER_SIGNATURE: u32 = 0x0403_4b50;
pub const CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0201_4b50;
pub const END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0605_4b50;
pub const ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE: u32 = 0x0606_4b50;
pub const ZIP64_LOCATOR_SIGNATURE: u32 = 0x0706_4b50;
pub const DATA_DESCRIPTOR_SIGNATURE: u32 = 0x0807_4b50;

pub const ZIP64_EXTRA_TAG: u16 = 0x0001;

/// Sentinel for a 32-bit size/offset field that has overflowed into ZIP64.
pub const SENTINEL_32: u32 = 0xFFFF_FFFF;
/// Sentinel for a 16-bit entry-count field that has overflowed into ZIP64.
pub const SENTINEL_16: u16 = 0xFFFF;

pub const FLAG_ENCRYPTED: u16 = 0x0001;
pub const FLAG_DATA_DESCRIPTOR: u16 = 0x0008;
pub const FLAG_STRONG_ENCRYPTION: u16 = 0x0040;
pub const FLAG_UTF8: u16 = 0x0800;

pub const METHOD_STORED: u16 = 0;
pub const METHOD_DEFLATE: u16 = 8;
pub const METHOD_BZIP2: u16 = 12;
pub const METHOD_LZMA: u16 = 14;

pub const VERSION_DEFAULT: u16 = 20;
pub const VERSION_ZIP64: u16 = 45;
pub const VERSION_MADE_BY_UNIX: u16 = 63;

/// Local file header: signature through the extra field. The filename and
/// extra are raw bytes; higher layers decode/normalize them.
#[derive(Debug, Clone)]
pub struct LocalFileHeader {
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub filename: Vec<u8>,
    pub extra: Vec<u8>,
}

impl LocalFileHeader {
    pub fn parse<R: Read + ?Sized>(reader: &mut R) -> Result<LocalFileHeader> {
        let signature = read_u32(reader)?;
        if signature != LOCAL_FILE_HEADER_SIGNATURE {
            return Err(SZipError::FormatError(format!(
                "bad local file header signature: expected 0x{:08x}, got 0x{:08x}",
                LOCAL_FILE_HEADER_SIGNATURE, signature
            )));
        }
        let version_needed = read_u16(reader)?;
        let flags = read_u16(reader)?;
        let method = read_u16(reader)?;
        let mod_time = read_u16(reader)?;
        let mod_date = read_u16(reader)?;
        let crc32 = read_u32(reader)?;
        let compressed_size = read_u32(reader)?;
        let uncompressed_size = read_u32(reader)?;
        let filename_len = read_u16(reader)? as usize;
        let extra_len = read_u16(reader)? as usize;
        let filename = read_exact_bytes(reader, filename_len)?;
        let extra = read_exact_bytes(reader, extra_len)?;

        Ok(LocalFileHeader {
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            filename,
            extra,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write<W: Write + ?Sized>(
        writer: &mut W,
        version_needed: u16,
        flags: u16,
        method: u16,
        mod_time: u16,
        mod_date: u16,
        crc32: u32,
        stored_compressed_size: u32,
        stored_uncompressed_size: u32,
        filename: &[u8],
        extra: &[u8],
    ) -> Result<()> {
        write_u32(writer, LOCAL_FILE_HEADER_SIGNATURE)?;
        write_u16(writer, version_needed)?;
        write_u16(writer, flags)?;
        write_u16(writer, method)?;
        write_u16(writer, mod_time)?;
        write_u16(writer, mod_date)?;
        write_u32(writer, crc32)?;
        write_u32(writer, stored_compressed_size)?;
        write_u32(writer, stored_uncompressed_size)?;
        write_u16(writer, filename.len() as u16)?;
        write_u16(writer, extra.len() as u16)?;
        write_bytes(writer, filename)?;
        write_bytes(writer, extra)?;
        Ok(())
    }
}

/// Central directory header: signature through the comment.
#[derive(Debug, Clone)]
pub struct CentralDirectoryHeader {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub flags: u16,
    pub method: u16,
    pub mod_time: u16,
    pub mod_date: u16,
    pub crc32: u32,
    pub compressed_size: u32,
    pub uncompressed_size: u32,
    pub disk_number_start: u16,
    pub internal_attrs: u16,
    pub external_attrs: u32,
    pub local_header_offset: u32,
    pub filename: Vec<u8>,
    pub extra: Vec<u8>,
    pub comment: Vec<u8>,
}

impl CentralDirectoryHeader {
    pub fn parse<R: Read + ?Sized>(reader: &mut R) -> Result<CentralDirectoryHeader> {
        let signature = read_u32(reader)?;
        if signature != CENTRAL_DIRECTORY_SIGNATURE {
            return Err(SZipError::FormatError(format!(
                "bad central directory header signature: expected 0x{:08x}, got 0x{:08x}",
                CENTRAL_DIRECTORY_SIGNATURE, signature
            )));
        }
        let version_made_by = read_u16(reader)?;
        let version_needed = read_u16(reader)?;
        let flags = read_u16(reader)?;
        let method = read_u16(reader)?;
        let mod_time = read_u16(reader)?;
        let mod_date = read_u16(reader)?;
        let crc32 = read_u32(reader)?;
        let compressed_size = read_u32(reader)?;
        let uncompressed_size = read_u32(reader)?;
        let filename_len = read_u16(reader)? as usize;
        let extra_len = read_u16(reader)? as usize;
        let comment_len = read_u16(reader)? as usize;
        let disk_number_start = read_u16(reader)?;
        let internal_attrs = read_u16(reader)?;
        let external_attrs = read_u32(reader)?;
        let local_header_offset = read_u32(reader)?;
        let filename = read_exact_bytes(reader, filename_len)?;
        let extra = read_exact_bytes(reader, extra_len)?;
        let comment = read_exact_bytes(reader, comment_len)?;

        Ok(CentralDirectoryHeader {
            version_made_by,
            version_needed,
            flags,
            method,
            mod_time,
            mod_date,
            crc32,
            compressed_size,
            uncompressed_size,
            disk_number_start,
            internal_attrs,
            external_attrs,
            local_header_offset,
            filename,
            extra,
            comment,
        })
    }

    #[allow(clippy::too_many_arguments)]
    pub fn write<W: Write + ?Sized>(
        writer: &mut W,
        version_made_by: u16,
        version_needed: u16,
        flags: u16,
        method: u16,
        mod_time: u16,
        mod_date: u16,
        crc32: u32,
        stored_compressed_size: u32,
        stored_uncompressed_size: u32,
        external_attrs: u32,
        stored_local_header_offset: u32,
        filename: &[u8],
        extra: &[u8],
    ) -> Result<()> {
        write_u32(writer, CENTRAL_DIRECTORY_SIGNATURE)?;
        write_u16(writer, version_made_by)?;
        write_u16(writer, version_needed)?;
        write_u16(writer, flags)?;
        write_u16(writer, method)?;
        write_u16(writer, mod_time)?;
        write_u16(writer, mod_date)?;
        write_u32(writer, crc32)?;
        write_u32(writer, stored_compressed_size)?;
        write_u32(writer, stored_uncompressed_size)?;
        write_u16(writer, filename.len() as u16)?;
        write_u16(writer, extra.len() as u16)?;
        write_u16(writer, 0)?; // comment length: this writer never emits one
        write_u16(writer, 0)?; // disk number start
        write_u16(writer, 0)?; // internal attributes
        write_u32(writer, external_attrs)?;
        write_u32(writer, stored_local_header_offset)?;
        write_bytes(writer, filename)?;
        write_bytes(writer, extra)?;
        Ok(())
    }
}

/// Classic end-of-central-directory record.
#[derive(Debug, Clone)]
pub struct EndOfCentralDirectory {
    pub disk_number: u16,
    pub disk_with_cd: u16,
    pub cd_entries_this_disk: u16,
    pub cd_entries_total: u16,
    pub cd_size: u32,
    pub cd_offset: u32,
    pub comment: Vec<u8>,
}

impl EndOfCentralDirectory {
    pub fn parse<R: Read + ?Sized>(reader: &mut R) -> Result<EndOfCentralDirectory> {
        let signature = read_u32(reader)?;
        if signature != END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(SZipError::FormatError(format!(
                "bad end of central directory signature: expected 0x{:08x}, got 0x{:08x}",
                END_OF_CENTRAL_DIRECTORY_SIGNATURE, signature
            )));
        }
        let disk_number = read_u16(reader)?;
        let disk_with_cd = read_u16(reader)?;
        let cd_entries_this_disk = read_u16(reader)?;
        let cd_entries_total = read_u16(reader)?;
        let cd_size = read_u32(reader)?;
        let cd_offset = read_u32(reader)?;
        let comment_len = read_u16(reader)? as usize;
        let comment = read_exact_bytes(reader, comment_len)?;

        Ok(EndOfCentralDirectory {
            disk_number,
            disk_with_cd,
            cd_entries_this_disk,
            cd_entries_total,
            cd_size,
            cd_offset,
            comment,
        })
    }

    pub fn write<W: Write + ?Sized>(
        writer: &mut W,
        cd_entries_total: u16,
        cd_size: u32,
        cd_offset: u32,
    ) -> Result<()> {
        write_u32(writer, END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        write_u16(writer, 0)?; // disk number
        write_u16(writer, 0)?; // disk with central directory
        write_u16(writer, cd_entries_total)?;
        write_u16(writer, cd_entries_total)?;
        write_u32(writer, cd_size)?;
        write_u32(writer, cd_offset)?;
        write_u16(writer, 0)?; // archive comment length
        Ok(())
    }
}

/// ZIP64 end-of-central-directory record (fixed portion only; this crate
/// never reads or writes the variable "zip64 extensible data sector").
#[derive(Debug, Clone)]
pub struct Zip64EndOfCentralDirectory {
    pub version_made_by: u16,
    pub version_needed: u16,
    pub disk_number: u32,
    pub disk_with_cd: u32,
    pub cd_entries_this_disk: u64,
    pub cd_entries_total: u64,
    pub cd_size: u64,
    pub cd_offset: u64,
}

impl Zip64EndOfCentralDirectory {
    /// Size of the fixed record on disk, signature included.
    pub const FIXED_SIZE_ON_DISK: u64 = 56;

    pub fn parse<R: Read + ?Sized>(reader: &mut R) -> Result<Zip64EndOfCentralDirectory> {
        let signature = read_u32(reader)?;
        if signature != ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE {
            return Err(SZipError::FormatError(format!(
                "bad ZIP64 end of central directory signature: expected 0x{:08x}, got 0x{:08x}",
                ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE, signature
            )));
        }
        let _record_size = read_u64(reader)?;
        let version_made_by = read_u16(reader)?;
        let version_needed = read_u16(reader)?;
        let disk_number = read_u32(reader)?;
        let disk_with_cd = read_u32(reader)?;
        let cd_entries_this_disk = read_u64(reader)?;
        let cd_entries_total = read_u64(reader)?;
        let cd_size = read_u64(reader)?;
        let cd_offset = read_u64(reader)?;

        Ok(Zip64EndOfCentralDirectory {
            version_made_by,
            version_needed,
            disk_number,
            disk_with_cd,
            cd_entries_this_disk,
            cd_entries_total,
            cd_size,
            cd_offset,
        })
    }

    pub fn write<W: Write + ?Sized>(
        writer: &mut W,
        cd_entries_total: u64,
        cd_size: u64,
        cd_offset: u64,
    ) -> Result<()> {
        write_u32(writer, ZIP64_END_OF_CENTRAL_DIRECTORY_SIGNATURE)?;
        // Size of the record that follows this field (total fixed size
        // minus the 4-byte signature and 8-byte size field themselves).
        write_u64(writer, Self::FIXED_SIZE_ON_DISK - 12)?;
        write_u16(writer, VERSION_MADE_BY_UNIX)?;
        write_u16(writer, VERSION_ZIP64)?;
        write_u32(writer, 0)?; // disk number
        write_u32(writer, 0)?; // disk with central directory
        write_u64(writer, cd_entries_total)?;
        write_u64(writer, cd_entries_total)?;
        write_u64(writer, cd_size)?;
        write_u64(writer, cd_offset)?;
        Ok(())
    }
}

/// ZIP64 end-of-central-directory locator.
#[derive(Debug, Clone)]
pub struct Zip64Locator {
    pub disk_with_zip64_eocd: u32,
    pub zip64_eocd_offset: u64,
    pub total_disks: u32,
}

impl Zip64Locator {
    pub const SIZE_ON_DISK: u64 = 20;

    /// Attempt to parse a locator. A signature mismatch is not an error: it
    /// simply means the archive that precedes this position is classic.
    pub fn try_parse<R: Read + ?Sized>(reader: &mut R) -> Result<Option<Zip64Locator>> {
        let signature = read_u32(reader)?;
        if signature != ZIP64_LOCATOR_SIGNATURE {
            return Ok(None);
        }
        let disk_with_zip64_eocd = read_u32(reader)?;
        let zip64_eocd_offset = read_u64(reader)?;
        let total_disks = read_u32(reader)?;
        Ok(Some(Zip64Locator {
            disk_with_zip64_eocd,
            zip64_eocd_offset,
            total_disks,
        }))
    }

    pub fn write<W: Write + ?Sized>(writer: &mut W, zip64_eocd_offset: u64) -> Result<()> {
        write_u32(writer, ZIP64_LOCATOR_SIGNATURE)?;
        write_u32(writer, 0)?; // disk with the ZIP64 EOCD
        write_u64(writer, zip64_eocd_offset)?;
        write_u32(writer, 1)?; // total number of disks
        Ok(())
    }
}

/// The positionally-decoded subset of a ZIP64 extra field that this crate
/// cares about: original size, compressed size, and local header offset.
/// Disk start is parsed but unused (single-disk archives only).
#[derive(Debug, Clone, Copy, Default)]
pub struct Zip64ExtraField {
    pub uncompressed_size: Option<u64>,
    pub compressed_size: Option<u64>,
    pub local_header_offset: Option<u64>,
    pub disk_start: Option<u32>,
}

impl Zip64ExtraField {
    /// Walk `tag, size` pairs in a raw extra-field buffer looking for tag
    /// `0x0001`. Fields whose declared size would overrun the buffer
    /// terminate the walk silently rather than erroring — the extra field
    /// is advisory, adversarial input here should not abort parsing.
    pub fn find_in(extra: &[u8]) -> Option<Zip64ExtraField> {
        let mut pos = 0usize;
        while pos + 4 <= extra.len() {
            let tag = u16::from_le_bytes([extra[pos], extra[pos + 1]]);
            let size = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;
            let data_start = pos + 4;
            if data_start + size > extra.len() {
                break;
            }
            if tag == ZIP64_EXTRA_TAG {
                return Some(Self::parse_field_data(&extra[data_start..data_start + size]));
            }
            pos = data_start + size;
        }
        None
    }

    fn parse_field_data(data: &[u8]) -> Zip64ExtraField {
        let mut field = Zip64ExtraField::default();
        let mut cursor = 0usize;

        if cursor + 8 <= data.len() {
            field.uncompressed_size = Some(u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap()));
            cursor += 8;
        }
        if cursor + 8 <= data.len() {
            field.compressed_size = Some(u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap()));
            cursor += 8;
        }
        if cursor + 8 <= data.len() {
            field.local_header_offset = Some(u64::from_le_bytes(data[cursor..cursor + 8].try_into().unwrap()));
            cursor += 8;
        }
        if cursor + 4 <= data.len() {
            field.disk_start = Some(u32::from_le_bytes(data[cursor..cursor + 4].try_into().unwrap()));
        }

        field
    }

    /// Serialize strictly: only the fields the caller marks as
    /// sentinel-shadowing are emitted, in the canonical
    /// (uncompressed, compressed, offset) order.
    pub fn build(uncompressed_size: Option<u64>, compressed_size: Option<u64>, local_header_offset: Option<u64>) -> Vec<u8> {
        let mut data = Vec::new();
        if let Some(v) = uncompressed_size {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = compressed_size {
            data.extend_from_slice(&v.to_le_bytes());
        }
        if let Some(v) = local_header_offset {
            data.extend_from_slice(&v.to_le_bytes());
        }

        let mut extra = Vec::with_capacity(4 + data.len());
        extra.extend_from_slice(&ZIP64_EXTRA_TAG.to_le_bytes());
        extra.extend_from_slice(&(data.len() as u16).to_le_bytes());
        extra.extend_from_slice(&data);
        extra
    }
}

/// Data descriptor following compressed data when flag bit 3 is set.
#[derive(Debug, Clone)]
pub struct DataDescriptor {
    pub crc32: u32,
    pub compressed_size: u64,
    pub uncompressed_size: u64,
}

impl DataDescriptor {
    pub fn parse<R: Read + ?Sized>(reader: &mut R, zip64: bool) -> Result<DataDescriptor> {
        let signature = read_u32(reader)?;
        if signature != DATA_DESCRIPTOR_SIGNATURE {
            return Err(SZipError::FormatError(format!(
                "bad data descriptor signature: expected 0x{:08x}, got 0x{:08x}",
                DATA_DESCRIPTOR_SIGNATURE, signature
            )));
        }
        let crc32 = read_u32(reader)?;
        let (compressed_size, uncompressed_size) = if zip64 {
            (read_u64(reader)?, read_u64(reader)?)
        } else {
            (read_u32(reader)? as u64, read_u32(reader)? as u64)
        };
        Ok(DataDescriptor {
            crc32,
            compressed_size,
            uncompressed_size,
        })
    }

    pub fn write<W: Write + ?Sized>(writer: &mut W, crc32: u32, compressed_size: u64, uncompressed_size: u64, zip64: bool) -> Result<()> {
        write_u32(writer, DATA_DESCRIPTOR_SIGNATURE)?;
        write_u32(writer, crc32)?;
        if zip64 {
            write_u64(writer, compressed_size)?;
            write_u64(writer, uncompressed_size)?;
        } else {
            write_u32(writer, compressed_size as u32)?;
            write_u32(writer, uncompressed_size as u32)?;
        }
        Ok(())
    }

    /// Byte size of the record on disk for the given variant.
    pub fn size_on_disk(zip64: bool) -> u64 {
        if zip64 {
            24
        } else {
            16
        }
    }
}
