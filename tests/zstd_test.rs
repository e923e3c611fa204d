//! Zstd frame-per-record behavior: offsets, skippable-frame dictionary
//! discovery, and recovery from damaged frames.

use std::io::Write;

use tempfile::Builder;

use cdxwrite::writer::{CdxOptions, CdxWriter, Stats};
use cdxwrite::{DispatchMode, IdentityCanonicalizer};

fn warc_record(uri: &str, body: &[u8]) -> Vec<u8> {
    let mut content = Vec::new();
    content.extend_from_slice(b"HTTP/1.0 200 OK\r\nContent-Type: text/plain\r\n");
    content.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    content.extend_from_slice(body);

    let mut out = Vec::new();
    out.extend_from_slice(b"WARC/1.0\r\n");
    out.extend_from_slice(b"WARC-Type: response\r\n");
    out.extend_from_slice(format!("WARC-Target-URI: {uri}\r\n").as_bytes());
    out.extend_from_slice(b"WARC-Date: 2019-11-18T12:56:03Z\r\n");
    out.extend_from_slice(b"Content-Type: application/http; msgtype=response\r\n");
    out.extend_from_slice(format!("Content-Length: {}\r\n", content.len()).as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(&content);
    out.extend_from_slice(b"\r\n\r\n");
    out
}

fn skippable_frame(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x184D2A5Du32.to_le_bytes());
    out.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    out.extend_from_slice(payload);
    out
}

fn run(path: &std::path::Path) -> (Vec<String>, Stats) {
    let opts = CdxOptions {
        mode: DispatchMode::Default,
        warc_path: "test".to_owned(),
        ..CdxOptions::default()
    };
    let mut writer = CdxWriter::new(opts, Box::new(IdentityCanonicalizer), None).unwrap();
    let mut out = Vec::new();
    writer.make_cdx(path, &mut out).unwrap();
    let text = String::from_utf8(out).unwrap();
    (
        text.lines().skip(1).map(str::to_owned).collect(),
        writer.stats().clone(),
    )
}

fn write_temp(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut f = Builder::new().suffix(".warc.zst").tempfile().unwrap();
    f.write_all(bytes).unwrap();
    f.flush().unwrap();
    f
}

#[test]
fn frame_offsets_match_compression_time_offsets() {
    let mut file = Vec::new();
    let mut offsets = Vec::new();
    for i in 0..8 {
        let rec = warc_record(
            &format!("http://example.com/{i}"),
            format!("record body number {i}").as_bytes(),
        );
        offsets.push(file.len() as u64);
        file.extend_from_slice(&zstd::encode_all(&rec[..], 3).unwrap());
    }
    let f = write_temp(&file);

    let (rows, stats) = run(f.path());
    assert_eq!(rows.len(), 8);
    for (i, row) in rows.iter().enumerate() {
        let cols: Vec<&str> = row.split(' ').collect();
        assert_eq!(cols[9], offsets[i].to_string(), "offset of record {i}");
        let next = if i + 1 < offsets.len() {
            offsets[i + 1]
        } else {
            file.len() as u64
        };
        assert_eq!(cols[8], (next - offsets[i]).to_string(), "size of record {i}");
    }
    assert_eq!(stats.num_records_failed, 0);
}

#[test]
fn dictionary_in_skippable_frame_roundtrips() {
    // Train a real dictionary over repetitive record-shaped samples.
    let samples: Vec<Vec<u8>> = (0..500)
        .map(|i| {
            warc_record(
                &format!("http://example.com/path/{i}/index.html"),
                format!("sample record body with shared structure, number {i}").as_bytes(),
            )
        })
        .collect();
    let dict = zstd::dict::from_samples(&samples, 4096).expect("dictionary training");
    // Trained dictionaries start with the dictionary magic.
    assert_eq!(&dict[..4], &[0x37, 0xA4, 0x30, 0xEC]);

    let mut file = Vec::new();
    file.extend_from_slice(&skippable_frame(&dict));

    let mut offsets = Vec::new();
    let mut compressor = zstd::bulk::Compressor::with_dictionary(3, &dict).unwrap();
    for i in 0..10 {
        let rec = warc_record(
            &format!("http://example.com/dict/{i}"),
            format!("dictionary-compressed record {i}").as_bytes(),
        );
        offsets.push(file.len() as u64);
        file.extend_from_slice(&compressor.compress(&rec).unwrap());
    }
    let f = write_temp(&file);

    let (rows, stats) = run(f.path());
    assert_eq!(rows.len(), 10);
    for (i, row) in rows.iter().enumerate() {
        let cols: Vec<&str> = row.split(' ').collect();
        assert_eq!(cols[0], format!("http://example.com/dict/{i}"));
        assert_eq!(cols[9], offsets[i].to_string(), "offset of record {i}");
    }
    assert_eq!(stats.num_records_failed, 0);
}

#[test]
fn skippable_frame_without_dictionary_magic_is_skipped() {
    let mut file = Vec::new();
    file.extend_from_slice(&skippable_frame(b"just an annotation, not a dictionary"));
    let record_offset = file.len() as u64;
    let rec = warc_record("http://example.com/", b"plain frame");
    file.extend_from_slice(&zstd::encode_all(&rec[..], 3).unwrap());
    let f = write_temp(&file);

    let (rows, _) = run(f.path());
    assert_eq!(rows.len(), 1);
    let cols: Vec<&str> = rows[0].split(' ').collect();
    assert_eq!(cols[9], record_offset.to_string());
}

#[test]
fn damaged_frame_skipped_next_frame_offsets_intact() {
    let mut file = Vec::new();
    let rec1 = warc_record("http://example.com/one", b"first");
    file.extend_from_slice(&zstd::encode_all(&rec1[..], 3).unwrap());
    file.extend_from_slice(b"#### damaged region, definitely not a frame ####");
    let rec2_offset = file.len() as u64;
    let rec2 = warc_record("http://example.com/two", b"second");
    file.extend_from_slice(&zstd::encode_all(&rec2[..], 3).unwrap());
    let f = write_temp(&file);

    let (rows, stats) = run(f.path());
    assert_eq!(rows.len(), 2);
    assert!(rows[0].contains("http://example.com/one"));
    assert!(rows[1].contains("http://example.com/two"));
    let cols: Vec<&str> = rows[1].split(' ').collect();
    assert_eq!(cols[9], rec2_offset.to_string());
    assert!(stats.num_records_failed >= 1);
}
