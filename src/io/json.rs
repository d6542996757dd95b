// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! JSON streams.
//!
//! Output is a JSON array with one entry per tuple: a JSON array in list
//! format (the default) or, with `format=object`, an object keyed by the
//! column names from `params`. Symbols render as strings, records as
//! nested arrays with `null` for nil. Input accepts the symmetric forms.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};

use serde_json::{json, Map, Value};

use crate::domain::{ram_bit_cast, RamDomain, RamFloat, RamUnsigned, TypeAttribute};
use crate::error::{Error, Result};
use crate::records::{RecordTable, NIL_RECORD};
use crate::relation::Relation;
use crate::symbols::SymbolTable;

use super::{Options, ReadStream, WriteStream};

/// A JSON tuple source.
pub struct JsonReader {
    source: Box<dyn Read>,
    params: Option<Vec<String>>,
}

impl JsonReader {
    /// A reader over the file named by the options.
    pub fn from_file(options: &Options) -> Result<Self> {
        let file = File::open(options.input_path())?;
        Ok(Self {
            source: Box::new(BufReader::new(file)),
            params: options.params()?,
        })
    }

    /// A reader over standard input.
    pub fn from_stdin(options: &Options) -> Result<Self> {
        Ok(Self {
            source: Box::new(std::io::stdin()),
            params: options.params()?,
        })
    }
}

impl ReadStream for JsonReader {
    fn read_into(
        &mut self,
        relation: &mut dyn Relation,
        symbols: &mut SymbolTable,
        records: &mut RecordTable,
    ) -> Result<usize> {
        let mut text = String::new();
        self.source.read_to_string(&mut text)?;
        let rows: Value = serde_json::from_str(&text)?;

        let rows = rows.as_array().ok_or_else(|| Error::InvalidInput {
            line: 1,
            column: 1,
            message: "top-level JSON value must be an array of rows".into(),
        })?;

        let arity = relation.primary_arity();
        let types = relation.column_types().to_vec();
        let mut tuple = vec![0 as RamDomain; relation.arity()];

        for (row_index, row) in rows.iter().enumerate() {
            let line = row_index + 1;
            for column in 0..arity {
                let cell = match row {
                    Value::Array(cells) => cells.get(column),
                    Value::Object(fields) => {
                        let name = self
                            .params
                            .as_ref()
                            .and_then(|names| names.get(column))
                            .ok_or_else(|| {
                                Error::Configuration(
                                    "object rows require column names in params".into(),
                                )
                            })?;
                        fields.get(name)
                    }
                    _ => None,
                };
                let cell = cell.ok_or_else(|| Error::InvalidInput {
                    line,
                    column: column + 1,
                    message: "row is missing a cell".into(),
                })?;
                tuple[column] = decode_value(cell, types[column], column + 1, symbols, records)?;
            }
            relation.insert(&tuple);
        }

        Ok(rows.len())
    }
}

fn decode_value(
    value: &Value,
    tag: TypeAttribute,
    column: usize,
    symbols: &mut SymbolTable,
    records: &mut RecordTable,
) -> Result<RamDomain> {
    let mismatch = || Error::TypeMismatch {
        column,
        value: value.to_string(),
    };

    match tag {
        TypeAttribute::Signed | TypeAttribute::Adt => value
            .as_i64()
            .and_then(|v| RamDomain::try_from(v).ok())
            .ok_or_else(mismatch),
        TypeAttribute::Unsigned => value
            .as_u64()
            .and_then(|v| RamUnsigned::try_from(v).ok())
            .map(ram_bit_cast)
            .ok_or_else(mismatch),
        TypeAttribute::Float => value
            .as_f64()
            .map(|v| ram_bit_cast(v as RamFloat))
            .ok_or_else(mismatch),
        TypeAttribute::Symbol => value
            .as_str()
            .map(|s| symbols.encode(s))
            .ok_or_else(mismatch),
        TypeAttribute::Record => decode_record(value, column, symbols, records),
    }
}

fn decode_record(
    value: &Value,
    column: usize,
    symbols: &mut SymbolTable,
    records: &mut RecordTable,
) -> Result<RamDomain> {
    match value {
        Value::Null => Ok(NIL_RECORD),
        Value::Array(elements) => {
            let mut packed = Vec::with_capacity(elements.len());
            for element in elements {
                let v = match element {
                    Value::Array(_) | Value::Null => {
                        decode_record(element, column, symbols, records)?
                    }
                    Value::String(s) => symbols.encode(s),
                    _ => element
                        .as_i64()
                        .and_then(|v| RamDomain::try_from(v).ok())
                        .ok_or_else(|| Error::TypeMismatch {
                            column,
                            value: element.to_string(),
                        })?,
                };
                packed.push(v);
            }
            Ok(records.pack(&packed))
        }
        _ => Err(Error::TypeMismatch {
            column,
            value: value.to_string(),
        }),
    }
}

/// A JSON tuple sink.
pub struct JsonWriter {
    sink: Box<dyn Write>,
    params: Option<Vec<String>>,
    objects: bool,
}

impl JsonWriter {
    /// A writer into the file named by the options.
    pub fn to_file(options: &Options) -> Result<Self> {
        let file = File::create(options.output_path())?;
        Self::to_sink(Box::new(BufWriter::new(file)), options)
    }

    /// A writer onto standard output.
    pub fn to_stdout(options: &Options) -> Result<Self> {
        Self::to_sink(Box::new(std::io::stdout()), options)
    }

    fn to_sink(sink: Box<dyn Write>, options: &Options) -> Result<Self> {
        let objects = options.get_or("format", "list") == "object";
        let params = options.params()?;
        if objects && params.is_none() {
            return Err(Error::Configuration(
                "object format requires column names in params".into(),
            ));
        }
        Ok(Self {
            sink,
            params,
            objects,
        })
    }
}

impl WriteStream for JsonWriter {
    fn write_all(
        &mut self,
        relation: &dyn Relation,
        symbols: &SymbolTable,
        records: &RecordTable,
    ) -> Result<()> {
        let arity = relation.primary_arity();
        let types = relation.column_types();

        let mut rows = Vec::with_capacity(relation.len());
        for tuple in relation.scan() {
            if self.objects {
                let mut fields = Map::new();
                for column in 0..arity {
                    let name = self
                        .params
                        .as_ref()
                        .and_then(|names| names.get(column).cloned())
                        .unwrap_or_else(|| format!("col{column}"));
                    fields.insert(
                        name,
                        encode_value(types[column], tuple[column], symbols, records),
                    );
                }
                rows.push(Value::Object(fields));
            } else {
                let cells: Vec<Value> = (0..arity)
                    .map(|c| encode_value(types[c], tuple[c], symbols, records))
                    .collect();
                rows.push(Value::Array(cells));
            }
        }

        serde_json::to_writer_pretty(&mut self.sink, &Value::Array(rows))?;
        self.sink.flush()?;
        Ok(())
    }
}

fn encode_value(
    tag: TypeAttribute,
    value: RamDomain,
    symbols: &SymbolTable,
    records: &RecordTable,
) -> Value {
    match tag {
        TypeAttribute::Signed | TypeAttribute::Adt => json!(value),
        TypeAttribute::Unsigned => json!(ram_bit_cast::<RamUnsigned, _>(value)),
        TypeAttribute::Float => json!(ram_bit_cast::<RamFloat, _>(value)),
        TypeAttribute::Symbol => json!(symbols.try_decode(value).unwrap_or_default()),
        TypeAttribute::Record => encode_record(value, records),
    }
}

fn encode_record(id: RamDomain, records: &RecordTable) -> Value {
    match records.unpack_any(id) {
        None => Value::Null,
        Some(values) => Value::Array(
            values
                .iter()
                .map(|&v| {
                    // nested references render recursively when they name a
                    // known record, plain numbers otherwise
                    if records.unpack_any(v).is_some() {
                        encode_record(v, records)
                    } else {
                        json!(v)
                    }
                })
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relation::BTreeRelation;

    #[test]
    fn list_rows_round_trip() {
        let types = vec![TypeAttribute::Signed, TypeAttribute::Symbol];
        let mut relation = BTreeRelation::<2>::new("t", types, 0);
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let data = br#"[[1, "one"], [2, "two"]]"#;
        let mut reader = JsonReader {
            source: Box::new(&data[..]),
            params: None,
        };
        let n = reader
            .read_into(&mut relation, &mut symbols, &mut records)
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(relation.len(), 2);

        let one = symbols.lookup("one").unwrap();
        assert!(relation.contains(&[1, one]));
    }

    #[test]
    fn object_rows_use_params() {
        let types = vec![TypeAttribute::Signed, TypeAttribute::Signed];
        let mut relation = BTreeRelation::<2>::new("t", types, 0);
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let data = br#"[{"x": 1, "y": 2}, {"x": 3, "y": 4}]"#;
        let mut reader = JsonReader {
            source: Box::new(&data[..]),
            params: Some(vec!["x".into(), "y".into()]),
        };
        reader
            .read_into(&mut relation, &mut symbols, &mut records)
            .unwrap();
        assert!(relation.contains(&[1, 2]));
        assert!(relation.contains(&[3, 4]));
    }

    #[test]
    fn records_decode_nested_and_nil() {
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let value: Value = serde_json::from_str("[1, [2, 3], null]").unwrap();
        let id = decode_record(&value, 1, &mut symbols, &mut records).unwrap();
        let outer = records.unpack_any(id).unwrap().to_vec();
        assert_eq!(outer[0], 1);
        assert_eq!(records.unpack_any(outer[1]), Some(&[2, 3][..]));
        assert_eq!(outer[2], NIL_RECORD);
    }

    #[test]
    fn non_array_input_is_invalid() {
        let types = vec![TypeAttribute::Signed, TypeAttribute::Signed];
        let mut relation = BTreeRelation::<2>::new("t", types, 0);
        let mut symbols = SymbolTable::new();
        let mut records = RecordTable::new();

        let mut reader = JsonReader {
            source: Box::new(&br#"{"not": "rows"}"#[..]),
            params: None,
        };
        assert!(matches!(
            reader.read_into(&mut relation, &mut symbols, &mut records),
            Err(Error::InvalidInput { .. })
        ));
    }

    #[test]
    fn writer_emits_list_rows() {
        let types = vec![TypeAttribute::Signed, TypeAttribute::Symbol];
        let mut relation = BTreeRelation::<2>::new("t", types, 0);
        let mut symbols = SymbolTable::new();
        let records = RecordTable::new();

        let id = symbols.encode("x");
        relation.insert(&[7, id]);

        let dir = tempfile::tempdir().unwrap();
        let options = Options::new("t").set("output-dir", dir.path().to_str().unwrap());
        let mut writer = JsonWriter::to_file(&options).unwrap();
        writer.write_all(&relation, &symbols, &records).unwrap();
        drop(writer);

        let text = std::fs::read_to_string(dir.path().join("t.csv")).unwrap();
        let parsed: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed, json!([[7, "x"]]));
    }
}
