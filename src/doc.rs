use std::fmt::Display;

use log::warn;
use serde::Deserialize;
use serde::Serialize;

use crate::error::Error;

pub type DocId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IndexingMode {
    /// Stored only, never searchable.
    NotIndexed,
    /// Indexed verbatim as a single term.
    ExactMatch,
    /// Tokenized and normalized by the analyzer.
    Analyzed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub mode: IndexingMode,
    pub stored: bool,
    pub boost: f32,
    pub freqs_and_positions: bool,
}

impl Field {
    pub fn new<N, V>(name: N, value: V, mode: IndexingMode) -> Field
    where
        N: Into<String>,
        V: Into<String>,
    {
        Field {
            name: name.into(),
            value: value.into(),
            mode,
            stored: true,
            boost: 1.0,
            freqs_and_positions: true,
        }
    }

    pub fn analyzed<N: Into<String>, V: Into<String>>(name: N, value: V) -> Field {
        Field::new(name, value, IndexingMode::Analyzed)
    }

    pub fn exact<N: Into<String>, V: Into<String>>(name: N, value: V) -> Field {
        Field::new(name, value, IndexingMode::ExactMatch)
    }

    pub fn stored_only<N: Into<String>, V: Into<String>>(name: N, value: V) -> Field {
        Field::new(name, value, IndexingMode::NotIndexed)
    }

    pub fn boost(mut self, boost: f32) -> Field {
        self.boost = boost;
        self
    }

    pub fn stored(mut self, stored: bool) -> Field {
        self.stored = stored;
        self
    }

    /// Index the field with a term frequency of one and no positions.
    pub fn omit_freqs_and_positions(mut self) -> Field {
        self.freqs_and_positions = false;
        self
    }

    pub fn validate(&self) -> Result<(), Error> {
        if self.name.is_empty() {
            return Err(Error::partial_field("", "field name is empty"));
        }
        if self.name.contains('\0') {
            return Err(Error::partial_field(
                self.name.clone(),
                "field name contains a NUL character",
            ));
        }
        if !self.boost.is_finite() || self.boost < 0.0 {
            return Err(Error::partial_field(
                self.name.clone(),
                format!("boost must be a finite number >= 0, got {}", self.boost),
            ));
        }
        Ok(())
    }

    /// The boost that applies to scoring; only analyzed fields are boosted.
    pub fn scoring_boost(&self) -> f32 {
        match self.mode {
            IndexingMode::Analyzed => self.boost,
            _ => 1.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    fields: Vec<Field>,
}

impl Document {
    pub fn new() -> Document {
        Document { fields: Vec::new() }
    }

    pub fn add(mut self, field: Field) -> Document {
        self.fields.push(field);
        self
    }

    pub fn push(&mut self, field: Field) {
        self.fields.push(field);
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .map(|f| f.value.as_str())
    }

    /// Drops every field that fails validation, logging each one, and
    /// returns what was dropped.
    pub fn retain_valid(&mut self) -> Vec<Error> {
        let mut dropped = Vec::new();
        self.fields.retain(|field| match field.validate() {
            Ok(()) => true,
            Err(e) => {
                warn!("Dropping field from document: {}", e);
                dropped.push(e);
                false
            }
        });
        dropped
    }

    pub fn stored(&self) -> StoredDoc {
        StoredDoc {
            fields: self
                .fields
                .iter()
                .filter(|f| f.stored)
                .map(|f| (f.name.clone(), f.value.clone()))
                .collect(),
        }
    }
}

/// Assembles a document from extractions that may fail. Failed extractions
/// are kept as `PartialField` errors instead of failing the document.
#[derive(Debug, Default)]
pub struct DocumentBuilder {
    doc: Document,
    omitted: Vec<Error>,
}

impl DocumentBuilder {
    pub fn new() -> DocumentBuilder {
        DocumentBuilder::default()
    }

    pub fn field(mut self, field: Field) -> DocumentBuilder {
        self.doc.push(field);
        self
    }

    /// Adds the field built from `extracted`, or records why it is missing.
    pub fn try_field<V, E, F>(mut self, name: &str, extracted: Result<V, E>, make: F) -> Self
    where
        V: Into<String>,
        E: Display,
        F: FnOnce(&str, String) -> Field,
    {
        match extracted {
            Ok(value) => self.doc.push(make(name, value.into())),
            Err(e) => {
                warn!("Omitting field {}: {}", name, e);
                self.omitted.push(Error::partial_field(name, e));
            }
        }
        self
    }

    pub fn build(self) -> (Document, Vec<Error>) {
        (self.doc, self.omitted)
    }
}

/// The stored values of one document, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredDoc {
    pub fields: Vec<(String, String)>,
}

impl StoredDoc {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.fields
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }
}
