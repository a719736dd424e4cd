//! Documents describing performance counters.
//!
//! A counter becomes one document with an exact `_type` marker and analyzed
//! `category`, `name`, `type` and `help` fields. Reading a counter attribute
//! may fail; the affected field is left out and reported, while the rest of
//! the counter is still indexed.

use std::fmt::Display;
use std::path::Path;

use log::info;

use crate::config::IndexConfig;
use crate::doc::DocId;
use crate::doc::Document;
use crate::doc::DocumentBuilder;
use crate::doc::Field;
use crate::error::Error;
use crate::error::Result;
use crate::index::Index;
use crate::index::IndexBuilder;
use crate::search::MatchAllDocsQuery;

pub const TYPE_FIELD: &str = "_type";
pub const COUNTER_TYPE: &str = "counter";

/// Where counter attributes come from. Any attribute can fail to load.
pub trait CounterSource {
    type Error: Display;

    fn category_name(&self) -> std::result::Result<String, Self::Error>;
    fn counter_name(&self) -> std::result::Result<String, Self::Error>;
    fn counter_help(&self) -> std::result::Result<String, Self::Error>;
    fn counter_type(&self) -> std::result::Result<String, Self::Error>;
}

/// Counter attributes that are already known. A missing type reports an
/// error, like an invalid counter layout does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterInfo {
    pub category: String,
    pub name: String,
    pub help: String,
    pub counter_type: Option<String>,
}

impl CounterSource for CounterInfo {
    type Error = String;

    fn category_name(&self) -> std::result::Result<String, String> {
        Ok(self.category.clone())
    }

    fn counter_name(&self) -> std::result::Result<String, String> {
        Ok(self.name.clone())
    }

    fn counter_help(&self) -> std::result::Result<String, String> {
        Ok(self.help.clone())
    }

    fn counter_type(&self) -> std::result::Result<String, String> {
        self.counter_type
            .clone()
            .ok_or_else(|| "counter layout is invalid".to_string())
    }
}

#[derive(Debug)]
pub struct CounterDocument {
    pub document: Document,
    /// One `PartialField` error per attribute that could not be read.
    pub omitted: Vec<Error>,
}

pub fn counter_document<C: CounterSource + ?Sized>(counter: &C) -> CounterDocument {
    let (document, omitted) = DocumentBuilder::new()
        .field(Field::exact(TYPE_FIELD, COUNTER_TYPE).omit_freqs_and_positions())
        .try_field("category", counter.category_name(), |name, value| {
            Field::analyzed(name, value).boost(1.5)
        })
        .try_field("name", counter.counter_name(), |name, value| {
            Field::analyzed(name, value).boost(2.0)
        })
        .try_field("type", counter.counter_type(), |name, value| {
            Field::analyzed(name, value).omit_freqs_and_positions()
        })
        .try_field("help", counter.counter_help(), |name, value| {
            Field::analyzed(name, value)
        })
        .build();
    CounterDocument { document, omitted }
}

/// Writes counters into a fresh index, replacing whatever was there.
/// Dropping it commits and, unless configured otherwise, optimizes.
pub struct CounterIndexer {
    index: Index,
}

impl CounterIndexer {
    pub fn create<P: AsRef<Path>>(path: P, config: IndexConfig) -> Result<CounterIndexer> {
        let index = IndexBuilder::new().config(config).open_or_create(path)?;
        index.delete(&MatchAllDocsQuery::new())?;
        info!("Indexing counters into {:?}", index.path());
        Ok(CounterIndexer { index })
    }

    /// Adds one counter. Returns its id and the fields that had to be left
    /// out.
    pub fn add_counter<C>(&self, counter: &C) -> Result<(DocId, Vec<Error>)>
    where
        C: CounterSource + ?Sized,
    {
        let CounterDocument { document, omitted } = counter_document(counter);
        let doc_id = self.index.add_doc(document)?;
        Ok((doc_id, omitted))
    }

    pub fn index(&self) -> &Index {
        &self.index
    }

    pub fn close(self) -> Result<()> {
        self.index.close()
    }
}
