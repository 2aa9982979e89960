use std::io::Write;

use pkzip_core::{CompressionMethod, SZipError, ZipArchive, ZipWriter};
use tempfile::tempdir;

#[test]
fn writes_and_reads_back_from_disk() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    let mut writer = ZipWriter::create(&path).unwrap();
    writer.add_bytes("readme.txt", b"hello from disk").unwrap();
    writer.add_bytes("nested/data.bin", b"\x01\x02\x03\x04").unwrap();
    writer.close().unwrap();

    let mut archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.list(), vec!["readme.txt", "nested/data.bin"]);
    assert_eq!(archive.open_entry("readme.txt").unwrap(), b"hello from disk");
    assert_eq!(archive.open_entry("nested/data.bin").unwrap(), b"\x01\x02\x03\x04");
}

#[test]
fn add_file_reads_source_from_disk() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let source_path = dir.path().join("source.txt");
    std::fs::write(&source_path, b"source file contents").unwrap();

    let archive_path = dir.path().join("archive.zip");
    let mut writer = ZipWriter::create(&archive_path).unwrap();
    writer.add_file("embedded.txt", &source_path, CompressionMethod::Deflate).unwrap();
    writer.close().unwrap();

    let mut archive = ZipArchive::open(&archive_path).unwrap();
    assert_eq!(archive.open_entry("embedded.txt").unwrap(), b"source file contents");
}

#[test]
fn get_info_reports_sizes_without_decompressing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    let data = vec![b'x'; 10_000];
    let mut writer = ZipWriter::create(&path).unwrap();
    writer.add_bytes("padded.bin", &data).unwrap();
    writer.close().unwrap();

    let archive = ZipArchive::open(&path).unwrap();
    let info = archive.get_info("padded.bin").unwrap();
    assert_eq!(info.uncompressed_size(), 10_000);
    assert!(info.compressed_size() < 10_000);
}

#[test]
fn stored_method_skips_compression() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    let mut writer = ZipWriter::create(&path).unwrap();
    writer
        .add_bytes_with("raw.bin", b"incompressible-ish data", CompressionMethod::Stored, false)
        .unwrap();
    writer.close().unwrap();

    let archive = ZipArchive::open(&path).unwrap();
    let info = archive.get_info("raw.bin").unwrap();
    assert_eq!(info.compressed_size(), info.uncompressed_size());
}

#[test]
fn corrupted_entry_data_fails_crc_check() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    {
        let mut writer = ZipWriter::create(&path).unwrap();
        writer.add_bytes_with("raw.bin", b"original data", CompressionMethod::Stored, false).unwrap();
        writer.close().unwrap();
    }

    // Flip a byte inside the stored payload without touching any header or
    // the central directory's recorded CRC-32.
    let mut bytes = std::fs::read(&path).unwrap();
    let needle = b"original data";
    let pos = bytes.windows(needle.len()).position(|w| w == needle).unwrap();
    bytes[pos] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let mut archive = ZipArchive::open(&path).unwrap();
    let err = archive.open_entry("raw.bin").unwrap_err();
    assert!(matches!(err, SZipError::CrcError { .. }));
}

#[test]
fn opening_a_non_archive_file_is_a_format_error() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("not-a-zip.bin");
    let mut f = std::fs::File::create(&path).unwrap();
    f.write_all(b"this is definitely not a zip archive").unwrap();

    let err = ZipArchive::open(&path).unwrap_err();
    assert!(matches!(err, SZipError::FormatError(_)));
}

#[test]
fn add_stream_uses_data_descriptor_and_round_trips() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    let mut writer = ZipWriter::create(&path).unwrap();
    writer
        .add_stream("streamed.txt", std::io::Cursor::new(b"streamed from a reader".to_vec()), CompressionMethod::Deflate)
        .unwrap();
    writer.close().unwrap();

    let mut archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.open_entry("streamed.txt").unwrap(), b"streamed from a reader");
}

#[test]
fn large_entry_count_forces_zip64_and_all_entries_are_reachable() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Past the classic 16-bit entry-count limit (65535), the archive must
    // carry a ZIP64 locator/EOCD, and every entry must still resolve.
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    const COUNT: usize = 70_000;
    {
        let mut writer = ZipWriter::create(&path).unwrap();
        for i in 0..COUNT {
            writer
                .add_bytes_with(&format!("f{i}"), b"A", CompressionMethod::Stored, false)
                .unwrap();
        }
        writer.close().unwrap();
    }

    let mut archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.list().len(), COUNT);
    assert_eq!(archive.open_entry("f0").unwrap(), b"A");
    assert_eq!(archive.open_entry(&format!("f{}", COUNT - 1)).unwrap(), b"A");
}

#[test]
fn boundary_entry_count_stays_classic() {
    let _ = env_logger::builder().is_test(true).try_init();
    // Exactly 65535 entries is still representable in the classic 16-bit
    // field, so no ZIP64 locator should be written.
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    const COUNT: usize = 65_535;
    {
        let mut writer = ZipWriter::create(&path).unwrap();
        for i in 0..COUNT {
            writer
                .add_bytes_with(&format!("f{i}"), b"A", CompressionMethod::Stored, false)
                .unwrap();
        }
        writer.close().unwrap();
    }

    let bytes = std::fs::read(&path).unwrap();
    assert!(
        bytes.windows(4).rposition(|w| w == [0x50, 0x4b, 0x06, 0x06]).is_none(),
        "no ZIP64 EOCD should be present at exactly 65535 entries"
    );

    let archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.list().len(), COUNT);
}

#[test]
fn encrypted_entry_is_listed_but_refuses_to_decompress() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    {
        let mut writer = ZipWriter::create(&path).unwrap();
        writer.add_bytes("plain.txt", b"not encrypted").unwrap();
        writer.add_bytes_with("secret.bin", b"would-be-plaintext", CompressionMethod::Stored, false).unwrap();
        writer.close().unwrap();
    }

    // No encryption support exists to produce a real encrypted entry, so the
    // general-purpose-flag bit 0 is set by hand on both the local header and
    // the central directory header for "secret.bin", mirroring how a
    // third-party encrypted archive would look on the wire. Local file
    // headers place `flags` at byte 6 and the filename at byte 30; central
    // directory headers place `flags` at byte 8 and the filename at byte 46.
    const LOCAL_SIG: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
    const CENTRAL_SIG: [u8; 4] = [0x50, 0x4b, 0x01, 0x02];
    let mut bytes = std::fs::read(&path).unwrap();
    let needle = b"secret.bin";
    let mut positions = Vec::new();
    let mut start = 0;
    while let Some(pos) = bytes[start..].windows(needle.len()).position(|w| w == needle) {
        positions.push(start + pos);
        start += pos + 1;
    }
    assert_eq!(positions.len(), 2, "expected local header + central directory occurrences");
    for name_pos in positions {
        if bytes[name_pos - 30..name_pos - 26] == LOCAL_SIG {
            bytes[name_pos - 24] |= 0x01;
        } else if bytes[name_pos - 46..name_pos - 42] == CENTRAL_SIG {
            bytes[name_pos - 38] |= 0x01;
        } else {
            panic!("filename occurrence at {name_pos} did not follow a recognized header");
        }
    }
    std::fs::write(&path, &bytes).unwrap();

    let mut archive = ZipArchive::open(&path).unwrap();
    assert_eq!(archive.list().len(), 2);
    assert_eq!(archive.open_entry("plain.txt").unwrap(), b"not encrypted");
    let err = archive.open_entry("secret.bin").unwrap_err();
    assert!(matches!(err, SZipError::UnsupportedFeature(_)));
}

#[test]
fn duplicate_name_collapses_to_last_occurrence_at_first_position() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempdir().unwrap();
    let path = dir.path().join("archive.zip");

    let mut writer = ZipWriter::create(&path).unwrap();
    writer.add_bytes("a.txt", b"AAA").unwrap();
    writer.add_bytes("dup.txt", b"first").unwrap();
    writer.add_bytes("b.txt", b"BBB").unwrap();
    writer.add_bytes("dup.txt", b"second").unwrap();
    writer.close().unwrap();

    let mut archive = ZipArchive::open(&path).unwrap();
    // The writer does not de-duplicate, so the archive on disk really does
    // contain two central directory records named "dup.txt" -- but the
    // reader's name-keyed map collapses them to one entry, at the position
    // of the first occurrence, holding the last occurrence's data.
    assert_eq!(archive.list(), vec!["a.txt", "dup.txt", "b.txt"]);
    assert_eq!(archive.open_entry("dup.txt").unwrap(), b"second");
}
