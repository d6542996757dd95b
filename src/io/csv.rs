// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! CSV streams.
//!
//! Two dialects are supported. The plain dialect splits rows on a free-form
//! delimiter (tab by default) and never quotes; when the delimiter contains
//! a comma, record cells `[..]` keep their inner commas through a
//! bracket-balance counter. The RFC 4180 dialect (`rfc4180=true`) goes
//! through the `csv` crate with standard quoting and defaults to a comma.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Read, Write};

use flate2::write::GzEncoder;
use flate2::Compression;

use crate::domain::{ram_bit_cast, RamDomain, RamFloat, RamUnsigned, TypeAttribute};
use crate::error::{Error, Result};
use crate::records::{RecordTable, NIL_RECORD};
use crate::relation::Relation;
use crate::symbols::SymbolTable;

use super::{Options, ReadStream, WriteStream};

fn check_dialect(options: &Options) -> Result<()> {
    if options.flag("rfc4180") && options.delimiter().contains('"') {
        return Err(Error::Configuration(
            "CSV delimiter cannot contain '\"' when rfc4180 is enabled".into(),
        ));
    }
    Ok(())
}

/// Parses the `columns` option: a colon-separated list of source column
/// indices, one per relation column.
fn column_map(raw: Option<&str>, arity: usize) -> Result<Option<Vec<usize>>> {
    let Some(raw) = raw else {
        return Ok(None);
    };
    let map = raw
        .split(':')
        .map(|part| {
            part.parse::<usize>().map_err(|_| {
                Error::Configuration(format!("invalid column set: <{raw}>"))
            })
        })
        .collect::<Result<Vec<_>>>()?;
    if map.len() < arity {
        return Err(Error::Configuration(format!("invalid column set: <{raw}>")));
    }
    Ok(Some(map))
}

/// A CSV tuple source.
pub struct CsvReader {
    source: Box<dyn BufRead>,
    delimiter: String,
    rfc4180: bool,
    headers: bool,
    columns: Option<String>,
}

impl CsvReader {
    /// A reader over the file named by the options.
    pub fn from_file(options: &Options) -> Result<Self> {
        let path = options.input_path();
        let file = File::open(&path).map_err(|e| {
            log::debug!("cannot open fact file {}: {e}", path.display());
            Error::Io(e)
        })?;
        Self::from_source(Box::new(BufReader::new(file)), options)
    }

    /// A reader over standard input.
    pub fn from_stdin(options: &Options) -> Result<Self> {
        Self::from_source(Box::new(BufReader::new(std::io::stdin())), options)
    }

    fn from_source(source: Box<dyn BufRead>, options: &Options) -> Result<Self> {
        check_dialect(options)?;
        Ok(Self {
            source,
            delimiter: options.delimiter().to_owned(),
            rfc4180: options.flag("rfc4180"),
            headers: options.flag("headers"),
            columns: options.get("columns").map(str::to_owned),
        })
    }

    /// Splits a plain-dialect row, keeping bracketed record cells intact
    /// when the delimiter contains a comma.
    fn split_plain(&self, line: &str) -> Vec<String> {
        let balance_records = self.delimiter.contains(',');
        let delim: &str = &self.delimiter;
        let bytes = line.as_bytes();

        let mut cells = Vec::new();
        let mut start = 0;
        let mut depth = 0i64;
        let mut i = 0;
        while i < bytes.len() {
            if balance_records {
                match bytes[i] {
                    b'[' => depth += 1,
                    b']' => depth -= 1,
                    _ => {}
                }
            }
            if depth == 0 && line[i..].starts_with(delim) {
                cells.push(line[start..i].to_owned());
                i += delim.len();
                start = i;
            } else {
                i += 1;
            }
        }
        cells.push(line[start..].to_owned());
        cells
    }

    fn parse_row(
        &self,
        cells: &[String],
        line: usize,
        relation: &mut dyn Relation,
        symbols: &mut SymbolTable,
        records: &mut RecordTable,
        columns: Option<&[usize]>,
        tuple: &mut Vec<RamDomain>,
    ) -> Result<()> {
        let arity = relation.primary_arity();
        let types = relation.column_types().to_vec();

        tuple.clear();
        tuple.resize(relation.arity(), 0);

        for slot in 0..arity {
            let source = columns.map_or(slot, |map| map[slot]);
            let cell = cells.get(source).ok_or_else(|| Error::InvalidInput {
                line,
                column: source + 1,
                message: format!("row has {} cells, expected {}", cells.len(), arity),
            })?;
            tuple[slot] = parse_cell(cell, types[slot], line, slot + 1, symbols, records)?;
        }

        relation.insert(tuple);
        Ok(())
    }
}

impl ReadStream for CsvReader {
    fn read_into(
        &mut self,
        relation: &mut dyn Relation,
        symbols: &mut SymbolTable,
        records: &mut RecordTable,
    ) -> Result<usize> {
        let columns = column_map(self.columns.as_deref(), relation.primary_arity())?;
        let mut tuple = Vec::new();
        let mut count = 0;

        if self.rfc4180 {
            let mut raw = Vec::new();
            self.source.read_to_end(&mut raw)?;

            let mut reader = csv::ReaderBuilder::new()
                .delimiter(*self.delimiter.as_bytes().first().unwrap_or(&b','))
                .has_headers(self.headers)
                .flexible(true)
                .from_reader(raw.as_slice());

            for (row, record) in reader.records().enumerate() {
                let record = record?;
                let line = row + 1 + usize::from(self.headers);
                let cells: Vec<String> = record.iter().map(str::to_owned).collect();
                self.parse_row(
                    &cells,
                    line,
                    relation,
                    symbols,
                    records,
                    columns.as_deref(),
                    &mut tuple,
                )?;
                count += 1;
            }
            return Ok(count);
        }

        let mut line_no = 0;
        let mut line = String::new();
        loop {
            line.clear();
            if self.source.read_line(&mut line)? == 0 {
                break;
            }
            line_no += 1;

            // rows end in LF; a CR left behind by foreign line endings goes
            let row = line.trim_end_matches(['\n', '\r']);
            if self.headers && line_no == 1 {
                continue;
            }
            if row.is_empty() {
                continue;
            }

            let cells = self.split_plain(row);
            self.parse_row(
                &cells,
                line_no,
                relation,
                symbols,
                records,
                columns.as_deref(),
                &mut tuple,
            )?;
            count += 1;
        }
        Ok(count)
    }
}

/// Parses one cell according to its column's type tag.
fn parse_cell(
    cell: &str,
    tag: TypeAttribute,
    line: usize,
    column: usize,
    symbols: &mut SymbolTable,
    records: &mut RecordTable,
) -> Result<RamDomain> {
    let mismatch = || Error::TypeMismatch {
        column,
        value: cell.to_owned(),
    };

    match tag {
        TypeAttribute::Signed | TypeAttribute::Adt => {
            cell.trim().parse::<RamDomain>().map_err(|_| mismatch())
        }
        TypeAttribute::Unsigned => cell
            .trim()
            .parse::<RamUnsigned>()
            .map(ram_bit_cast)
            .map_err(|_| mismatch()),
        TypeAttribute::Float => cell
            .trim()
            .parse::<RamFloat>()
            .map(ram_bit_cast)
            .map_err(|_| mismatch()),
        TypeAttribute::Symbol => Ok(symbols.encode(cell)),
        TypeAttribute::Record => parse_record(cell.trim(), line, column, records),
    }
}

/// Parses a record cell: `nil`, or a bracketed, comma-separated list whose
/// elements are numbers or nested records.
fn parse_record(
    text: &str,
    line: usize,
    column: usize,
    records: &mut RecordTable,
) -> Result<RamDomain> {
    if text == "nil" {
        return Ok(NIL_RECORD);
    }

    let inner = text
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| Error::InvalidInput {
            line,
            column,
            message: format!("malformed record {text:?}"),
        })?;

    let mut values = Vec::new();
    let mut depth = 0i64;
    let mut start = 0;
    let bytes = inner.as_bytes();
    for i in 0..=bytes.len() {
        let split = i == bytes.len() || (depth == 0 && bytes[i] == b',');
        if split {
            let element = inner[start..i].trim();
            if !element.is_empty() {
                if element.starts_with('[') || element == "nil" {
                    values.push(parse_record(element, line, column, records)?);
                } else {
                    values.push(element.parse::<RamDomain>().map_err(|_| {
                        Error::TypeMismatch {
                            column,
                            value: element.to_owned(),
                        }
                    })?);
                }
            }
            start = i + 1;
        } else {
            match bytes[i] {
                b'[' => depth += 1,
                b']' => depth -= 1,
                _ => {}
            }
        }
    }

    if depth != 0 {
        return Err(Error::InvalidInput {
            line,
            column,
            message: format!("unbalanced record brackets in {text:?}"),
        });
    }

    Ok(records.pack(&values))
}

enum CsvSink {
    Stream(Box<dyn Write>),
    SizeOnly,
}

/// A CSV tuple sink.
pub struct CsvWriter {
    sink: CsvSink,
    delimiter: String,
    rfc4180: bool,
    headers: bool,
    params: Option<Vec<String>>,
}

impl CsvWriter {
    /// A writer into the file named by the options; gzip-compressed when
    /// `compress=true`.
    pub fn to_file(options: &Options) -> Result<Self> {
        let path = options.output_path();
        let file = File::create(&path)?;
        let sink: Box<dyn Write> = if options.flag("compress") {
            Box::new(GzEncoder::new(BufWriter::new(file), Compression::default()))
        } else {
            Box::new(BufWriter::new(file))
        };
        Self::to_sink(CsvSink::Stream(sink), options)
    }

    /// A writer onto standard output.
    pub fn to_stdout(options: &Options) -> Result<Self> {
        Self::to_sink(CsvSink::Stream(Box::new(std::io::stdout())), options)
    }

    /// A pseudo-writer printing only the relation name and size.
    #[must_use]
    pub fn size_only(_options: &Options) -> Self {
        Self {
            sink: CsvSink::SizeOnly,
            delimiter: "\t".to_owned(),
            rfc4180: false,
            headers: false,
            params: None,
        }
    }

    fn to_sink(sink: CsvSink, options: &Options) -> Result<Self> {
        check_dialect(options)?;
        Ok(Self {
            sink,
            delimiter: options.delimiter().to_owned(),
            rfc4180: options.flag("rfc4180"),
            headers: options.flag("headers"),
            params: options.params()?,
        })
    }

    fn render_cell(
        tag: TypeAttribute,
        value: RamDomain,
        symbols: &SymbolTable,
        records: &RecordTable,
    ) -> String {
        match tag {
            TypeAttribute::Signed | TypeAttribute::Adt => value.to_string(),
            TypeAttribute::Unsigned => ram_bit_cast::<RamUnsigned, _>(value).to_string(),
            TypeAttribute::Float => ram_bit_cast::<RamFloat, _>(value).to_string(),
            TypeAttribute::Symbol => symbols
                .try_decode(value)
                .unwrap_or_default()
                .to_owned(),
            TypeAttribute::Record => render_record(value, records),
        }
    }
}

fn render_record(id: RamDomain, records: &RecordTable) -> String {
    match records.unpack_any(id) {
        None => "nil".to_owned(),
        Some(values) => {
            let inner: Vec<String> = values.iter().map(ToString::to_string).collect();
            format!("[{}]", inner.join(", "))
        }
    }
}

impl WriteStream for CsvWriter {
    fn write_all(
        &mut self,
        relation: &dyn Relation,
        symbols: &SymbolTable,
        records: &RecordTable,
    ) -> Result<()> {
        let arity = relation.primary_arity();
        let types = relation.column_types();

        let out = match &mut self.sink {
            CsvSink::SizeOnly => {
                let mut stdout = std::io::stdout();
                writeln!(stdout, "{}\t{}", relation.name(), relation.len())?;
                return Ok(());
            }
            CsvSink::Stream(out) => out,
        };

        if self.rfc4180 {
            let mut writer = csv::WriterBuilder::new()
                .delimiter(*self.delimiter.as_bytes().first().unwrap_or(&b','))
                .from_writer(&mut *out);

            if self.headers {
                writer.write_record(header_names(self.params.as_deref(), arity))?;
            }
            for tuple in relation.scan() {
                let row: Vec<String> = (0..arity)
                    .map(|c| Self::render_cell(types[c], tuple[c], symbols, records))
                    .collect();
                writer.write_record(&row)?;
            }
            writer.flush()?;
        } else {
            if self.headers {
                let names = header_names(self.params.as_deref(), arity);
                writeln!(out, "{}", names.join(&self.delimiter))?;
            }
            for tuple in relation.scan() {
                let row: Vec<String> = (0..arity)
                    .map(|c| Self::render_cell(types[c], tuple[c], symbols, records))
                    .collect();
                writeln!(out, "{}", row.join(&self.delimiter))?;
            }
            out.flush()?;
        }
        Ok(())
    }
}

fn header_names(params: Option<&[String]>, arity: usize) -> Vec<String> {
    (0..arity)
        .map(|c| {
            params
                .and_then(|names| names.get(c).cloned())
                .unwrap_or_else(|| format!("col{c}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::BTreeRelation;

    fn rel(types: &[TypeAttribute]) -> BTreeRelation<2> {
        BTreeRelation::new("t", types.to_vec(), 0)
    }

    #[test]
    fn plain_split_respects_record_brackets() {
        let options = Options::new("t").set("delimiter", ",");
        let reader = CsvReader::from_source(Box::new(&b""[..]), &options).unwrap();
        assert_eq!(
            reader.split_plain("[1, 2],3"),
            vec!["[1, 2]".to_owned(), "3".to_owned()]
        );
        assert_eq!(
            reader.split_plain("a,b,c"),
            vec!["a".to_owned(), "b".to_owned(), "c".to_owned()]
        );
    }

    #[test]
    fn reads_tab_separated_rows() {
        let data = b"1\t2\n3\t4\r\n5\t6\n";
        let options = Options::new("t");
        let mut reader = CsvReader::from_source(Box::new(&data[..]), &options).unwrap();

        let mut relation = rel(&[TypeAttribute::Signed; 2]);
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();
        let n = reader
            .read_into(&mut relation, &mut symbols, &mut records)
            .unwrap();
        assert_eq!(n, 3);
        assert!(relation.contains(&[3, 4]));
        assert!(relation.contains(&[5, 6]));
    }

    #[test]
    fn bad_cells_report_line_and_column() {
        let data = b"1\t2\n1\tx\n";
        let options = Options::new("t");
        let mut reader = CsvReader::from_source(Box::new(&data[..]), &options).unwrap();

        let mut relation = rel(&[TypeAttribute::Signed; 2]);
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();
        let err = reader
            .read_into(&mut relation, &mut symbols, &mut records)
            .unwrap_err();
        match err {
            Error::TypeMismatch { column, value } => {
                assert_eq!(column, 2);
                assert_eq!(value, "x");
            }
            other => panic!("unexpected error {other:?}"),
        }
        // tuples before the error were kept
        assert!(relation.contains(&[1, 2]));
    }

    #[test]
    fn symbols_and_records_round_trip_through_cells() {
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let id = parse_cell("hello", TypeAttribute::Symbol, 1, 1, &mut symbols, &mut records)
            .unwrap();
        assert_eq!(symbols.decode(id), "hello");

        let rec = parse_cell(
            "[1, [2, 3]]",
            TypeAttribute::Record,
            1,
            1,
            &mut symbols,
            &mut records,
        )
        .unwrap();
        let outer = records.unpack_any(rec).unwrap().to_vec();
        assert_eq!(outer.len(), 2);
        assert_eq!(outer[0], 1);
        assert_eq!(records.unpack_any(outer[1]), Some(&[2, 3][..]));

        let nil = parse_cell("nil", TypeAttribute::Record, 1, 1, &mut symbols, &mut records)
            .unwrap();
        assert_eq!(nil, NIL_RECORD);
    }

    #[test]
    fn quote_in_rfc_delimiter_is_a_configuration_error() {
        let options = Options::new("t")
            .set("rfc4180", "true")
            .set("delimiter", "\"");
        assert!(matches!(
            CsvReader::from_source(Box::new(&b""[..]), &options),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn unsigned_and_float_cells_bitcast() {
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let u = parse_cell(
            &RamUnsigned::MAX.to_string(),
            TypeAttribute::Unsigned,
            1,
            1,
            &mut symbols,
            &mut records,
        )
        .unwrap();
        assert_eq!(ram_bit_cast::<RamUnsigned, _>(u), RamUnsigned::MAX);

        let f = parse_cell("-2.5", TypeAttribute::Float, 1, 1, &mut symbols, &mut records)
            .unwrap();
        assert_eq!(ram_bit_cast::<RamFloat, _>(f), -2.5);
    }
}
