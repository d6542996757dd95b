// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

use std::io::Read;

use factstore::io::{IoRegistry, Options};
use factstore::{BTreeRelation, RecordTable, Relation, SymbolTable, TypeAttribute};

fn registry() -> IoRegistry {
    IoRegistry::new()
}

#[test]
fn csv_round_trip_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let types = vec![TypeAttribute::Signed, TypeAttribute::Symbol];
    let mut relation = BTreeRelation::<2>::new("edge", types.clone(), 0);
    let mut symbols = SymbolTable::new();
    let mut records = RecordTable::new();

    for (n, name) in [(1, "a"), (2, "b"), (3, "c")] {
        let id = symbols.encode(name);
        relation.insert(&[n, id]);
    }

    let write_opts = Options::new("edge")
        .set("output-dir", dir_str)
        .set("filename", "edge.facts");
    registry()
        .write_from(&write_opts, &relation, &symbols, &records)
        .unwrap();

    let mut reloaded = BTreeRelation::<2>::new("edge", types, 0);
    let read_opts = Options::new("edge").set("fact-dir", dir_str);
    let n = registry()
        .read_into(&read_opts, &mut reloaded, &mut symbols, &mut records)
        .unwrap();

    assert_eq!(n, 3);
    assert_eq!(reloaded.len(), 3);
    let original: Vec<_> = relation.scan().collect();
    let reread: Vec<_> = reloaded.scan().collect();
    assert_eq!(original, reread);
}

#[test]
fn rfc4180_quoting_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let types = vec![TypeAttribute::Symbol, TypeAttribute::Signed];
    let mut relation = BTreeRelation::<2>::new("names", types.clone(), 0);
    let mut symbols = SymbolTable::new();
    let mut records = RecordTable::new();

    // symbols that need quoting under RFC 4180
    for (name, v) in [("plain", 1), ("with,comma", 2), ("with\"quote", 3)] {
        let id = symbols.encode(name);
        relation.insert(&[id, v]);
    }

    let write_opts = Options::new("names")
        .set("output-dir", dir_str)
        .set("filename", "names.facts")
        .set("rfc4180", "true");
    registry()
        .write_from(&write_opts, &relation, &symbols, &records)
        .unwrap();

    let mut reloaded = BTreeRelation::<2>::new("names", types, 0);
    let read_opts = Options::new("names")
        .set("fact-dir", dir_str)
        .set("rfc4180", "true");
    registry()
        .read_into(&read_opts, &mut reloaded, &mut symbols, &mut records)
        .unwrap();

    for name in ["plain", "with,comma", "with\"quote"] {
        let id = symbols.lookup(name).unwrap();
        assert!(
            (1..=3).any(|v| reloaded.contains(&[id, v])),
            "symbol {name:?} lost in round trip"
        );
    }
}

#[test]
fn compressed_output_is_gzip() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let types = vec![TypeAttribute::Signed, TypeAttribute::Signed];
    let mut relation = BTreeRelation::<2>::new("nums", types, 0);
    let symbols = SymbolTable::new();
    let records = RecordTable::new();
    for i in 0..100 {
        relation.insert(&[i, i * i]);
    }

    let write_opts = Options::new("nums")
        .set("output-dir", dir_str)
        .set("compress", "true");
    registry()
        .write_from(&write_opts, &relation, &symbols, &records)
        .unwrap();

    let raw = std::fs::read(dir.path().join("nums.csv")).unwrap();
    assert_eq!(&raw[..2], &[0x1f, 0x8b], "missing gzip magic");

    let mut text = String::new();
    flate2::read::GzDecoder::new(&raw[..])
        .read_to_string(&mut text)
        .unwrap();
    assert_eq!(text.lines().count(), 100);
    assert!(text.lines().next().unwrap().contains('\t'));
}

#[test]
fn json_round_trip_with_records() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let types = vec![TypeAttribute::Symbol, TypeAttribute::Record];
    let mut relation = BTreeRelation::<2>::new("points", types.clone(), 0);
    let mut symbols = SymbolTable::new();
    let mut records = RecordTable::new();

    let origin = symbols.encode("origin");
    let unit = symbols.encode("unit");
    let p0 = records.pack(&[0, 0]);
    let p1 = records.pack(&[1, 1]);
    relation.insert(&[origin, p0]);
    relation.insert(&[unit, p1]);

    let write_opts = Options::new("points")
        .set("IO", "jsonfile")
        .set("output-dir", dir_str)
        .set("filename", "points.json");
    registry()
        .write_from(&write_opts, &relation, &symbols, &records)
        .unwrap();

    let mut reloaded = BTreeRelation::<2>::new("points", types, 0);
    let read_opts = Options::new("points")
        .set("IO", "jsonfile")
        .set("fact-dir", dir_str)
        .set("filename", "points.json");
    let n = registry()
        .read_into(&read_opts, &mut reloaded, &mut symbols, &mut records)
        .unwrap();

    assert_eq!(n, 2);
    let reread: Vec<_> = reloaded.scan().collect();
    for tuple in reread {
        let name = symbols.try_decode(tuple[0]).unwrap();
        let coords = records.unpack(tuple[1], 2).unwrap();
        match name {
            "origin" => assert_eq!(coords, &[0, 0]),
            "unit" => assert_eq!(coords, &[1, 1]),
            other => panic!("unexpected symbol {other}"),
        }
    }
}

#[test]
fn column_remap_reads_reordered_files() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("swap.facts"), "10\t20\n30\t40\n").unwrap();

    let types = vec![TypeAttribute::Signed, TypeAttribute::Signed];
    let mut relation = BTreeRelation::<2>::new("swap", types, 0);
    let mut symbols = SymbolTable::new();
    let mut records = RecordTable::new();

    // relation column 0 reads file column 1 and vice versa
    let read_opts = Options::new("swap")
        .set("fact-dir", dir.path().to_str().unwrap())
        .set("columns", "1:0");
    registry()
        .read_into(&read_opts, &mut relation, &mut symbols, &mut records)
        .unwrap();

    assert!(relation.contains(&[20, 10]));
    assert!(relation.contains(&[40, 30]));
}

#[test]
fn headers_are_written_and_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let dir_str = dir.path().to_str().unwrap();

    let types = vec![TypeAttribute::Signed, TypeAttribute::Signed];
    let mut relation = BTreeRelation::<2>::new("h", types.clone(), 0);
    let symbols = SymbolTable::new();
    let records = RecordTable::new();
    relation.insert(&[1, 2]);

    let write_opts = Options::new("h")
        .set("output-dir", dir_str)
        .set("filename", "h.facts")
        .set("headers", "true")
        .set("params", r#"["from", "to"]"#);
    registry()
        .write_from(&write_opts, &relation, &symbols, &records)
        .unwrap();

    let text = std::fs::read_to_string(dir.path().join("h.facts")).unwrap();
    assert!(text.starts_with("from\tto\n"));

    let mut reloaded = BTreeRelation::<2>::new("h", types, 0);
    let mut symbols = SymbolTable::new();
    let mut records = RecordTable::new();
    let read_opts = Options::new("h")
        .set("fact-dir", dir_str)
        .set("filename", "h.facts")
        .set("headers", "true");
    let n = registry()
        .read_into(&read_opts, &mut reloaded, &mut symbols, &mut records)
        .unwrap();
    assert_eq!(n, 1);
    assert!(reloaded.contains(&[1, 2]));
}
