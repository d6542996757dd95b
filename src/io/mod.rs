// Copyright (c) 2025-present, factstore
// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

//! The serialization facade: reader/writer streams for relations, selected
//! by the `IO=` key of a key-value options map and dispatched through a
//! pluggable registry.
//!
//! Built-in keys: `file`, `stdin`, `stdout`, `stdoutprintsize` (CSV) and
//! `json`, `jsonfile` (JSON). The `sqlite` key is recognized but reported
//! as unsupported by this build; anything else is an invalid-argument
//! error. Parse errors abort the enclosing operation without corrupting
//! the in-memory relation (tuples inserted before the error remain).

mod csv;
mod json;

pub use self::csv::{CsvReader, CsvWriter};
pub use self::json::{JsonReader, JsonWriter};

use rustc_hash::FxHashMap;

use crate::error::{Error, Result};
use crate::records::RecordTable;
use crate::relation::Relation;
use crate::symbols::SymbolTable;

/// The key-value options map configuring a reader or writer.
#[derive(Debug, Default, Clone)]
pub struct Options {
    map: FxHashMap<String, String>,
}

impl Options {
    /// Creates an options map for the given relation name.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let mut map = FxHashMap::default();
        map.insert("name".to_owned(), name.into());
        Self { map }
    }

    /// Sets an option, builder style.
    #[must_use]
    pub fn set(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.map.insert(key.into(), value.into());
        self
    }

    /// The raw option value, if present.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    /// The option value or a default.
    #[must_use]
    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// A boolean option (`"true"` enables it).
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.get_or(key, "false") == "true"
    }

    /// The relation name this stream operates on.
    #[must_use]
    pub fn name(&self) -> &str {
        self.get_or("name", "")
    }

    /// The `IO=` dispatch key.
    #[must_use]
    pub fn io_type(&self) -> &str {
        self.get_or("IO", "file")
    }

    /// The input path: `filename` (default `<name>.facts`) under
    /// `fact-dir`.
    #[must_use]
    pub fn input_path(&self) -> std::path::PathBuf {
        let file = self
            .get("filename")
            .map_or_else(|| format!("{}.facts", self.name()), str::to_owned);
        std::path::Path::new(self.get_or("fact-dir", ".")).join(file)
    }

    /// The output path: `filename` (default `<name>.csv`) under
    /// `output-dir`.
    #[must_use]
    pub fn output_path(&self) -> std::path::PathBuf {
        let file = self
            .get("filename")
            .map_or_else(|| format!("{}.csv", self.name()), str::to_owned);
        std::path::Path::new(self.get_or("output-dir", ".")).join(file)
    }

    /// The cell delimiter: `delimiter`, defaulting to `,` under RFC 4180
    /// and tab otherwise.
    #[must_use]
    pub fn delimiter(&self) -> &str {
        self.get_or("delimiter", if self.flag("rfc4180") { "," } else { "\t" })
    }

    /// The column names from the `params` JSON array, if configured.
    pub fn params(&self) -> Result<Option<Vec<String>>> {
        let Some(raw) = self.get("params") else {
            return Ok(None);
        };
        let value: serde_json::Value = serde_json::from_str(raw)?;
        let names = value
            .as_array()
            .ok_or_else(|| Error::Configuration("params must be a JSON array".into()))?
            .iter()
            .map(|v| {
                v.as_str()
                    .map(str::to_owned)
                    .ok_or_else(|| Error::Configuration("params entries must be strings".into()))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(names))
    }
}

/// A stream producing tuples into a relation.
pub trait ReadStream {
    /// Reads the whole stream into `relation`; returns the number of tuples
    /// read (including duplicates the relation rejected).
    fn read_into(
        &mut self,
        relation: &mut dyn Relation,
        symbols: &mut SymbolTable,
        records: &mut RecordTable,
    ) -> Result<usize>;
}

/// A stream emitting the tuples of a relation.
pub trait WriteStream {
    /// Writes the whole relation.
    fn write_all(
        &mut self,
        relation: &dyn Relation,
        symbols: &SymbolTable,
        records: &RecordTable,
    ) -> Result<()>;
}

type ReaderFactory = fn(&Options) -> Result<Box<dyn ReadStream>>;
type WriterFactory = fn(&Options) -> Result<Box<dyn WriteStream>>;

/// The registry dispatching `IO=` keys to stream factories.
pub struct IoRegistry {
    readers: FxHashMap<String, ReaderFactory>,
    writers: FxHashMap<String, WriterFactory>,
}

impl Default for IoRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl IoRegistry {
    /// A registry with the built-in formats registered.
    #[must_use]
    pub fn new() -> Self {
        let mut registry = Self {
            readers: FxHashMap::default(),
            writers: FxHashMap::default(),
        };

        registry.register_reader("file", |opts| Ok(Box::new(CsvReader::from_file(opts)?)));
        registry.register_reader("stdin", |opts| Ok(Box::new(CsvReader::from_stdin(opts)?)));
        registry.register_writer("file", |opts| Ok(Box::new(CsvWriter::to_file(opts)?)));
        registry.register_writer("stdout", |opts| Ok(Box::new(CsvWriter::to_stdout(opts)?)));
        registry.register_writer("stdoutprintsize", |opts| {
            Ok(Box::new(CsvWriter::size_only(opts)))
        });

        registry.register_reader("jsonfile", |opts| Ok(Box::new(JsonReader::from_file(opts)?)));
        registry.register_reader("json", |opts| Ok(Box::new(JsonReader::from_stdin(opts)?)));
        registry.register_writer("jsonfile", |opts| Ok(Box::new(JsonWriter::to_file(opts)?)));
        registry.register_writer("json", |opts| Ok(Box::new(JsonWriter::to_stdout(opts)?)));

        registry
    }

    /// Registers (or replaces) a reader factory for an `IO=` key.
    pub fn register_reader(&mut self, key: impl Into<String>, factory: ReaderFactory) {
        self.readers.insert(key.into(), factory);
    }

    /// Registers (or replaces) a writer factory for an `IO=` key.
    pub fn register_writer(&mut self, key: impl Into<String>, factory: WriterFactory) {
        self.writers.insert(key.into(), factory);
    }

    /// Builds the reader selected by the options' `IO=` key.
    pub fn reader(&self, options: &Options) -> Result<Box<dyn ReadStream>> {
        let key = options.io_type();
        if key == "sqlite" {
            return Err(Error::Unsupported("sqlite"));
        }
        let factory = self
            .readers
            .get(key)
            .ok_or_else(|| Error::UnknownIoType(key.to_owned()))?;
        factory(options)
    }

    /// Builds the writer selected by the options' `IO=` key.
    pub fn writer(&self, options: &Options) -> Result<Box<dyn WriteStream>> {
        let key = options.io_type();
        if key == "sqlite" {
            return Err(Error::Unsupported("sqlite"));
        }
        let factory = self
            .writers
            .get(key)
            .ok_or_else(|| Error::UnknownIoType(key.to_owned()))?;
        factory(options)
    }

    /// Reads a stream into the relation; convenience for
    /// [`reader`](Self::reader) + [`ReadStream::read_into`].
    pub fn read_into(
        &self,
        options: &Options,
        relation: &mut dyn Relation,
        symbols: &mut SymbolTable,
        records: &mut RecordTable,
    ) -> Result<usize> {
        let mut stream = self.reader(options)?;
        let n = stream.read_into(relation, symbols, records)?;
        log::debug!("loaded {n} tuples into relation {}", relation.name());
        Ok(n)
    }

    /// Writes the relation through the selected writer.
    pub fn write_from(
        &self,
        options: &Options,
        relation: &dyn Relation,
        symbols: &SymbolTable,
        records: &RecordTable,
    ) -> Result<()> {
        let mut stream = self.writer(options)?;
        stream.write_all(relation, symbols, records)?;
        log::debug!(
            "stored {} tuples from relation {}",
            relation.len(),
            relation.name()
        );
        Ok(())
    }
}
