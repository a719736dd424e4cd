pub mod analyzis;
pub mod config;
pub mod counter;
pub mod doc;
pub mod doc_iter;
pub mod error;
pub mod index;
pub mod inverted;
pub mod manifest;
pub mod merge;
pub mod query_parser;
pub mod reader;
pub mod search;
pub mod seg;
pub mod stored;
mod util;

pub use crate::config::IndexConfig;
pub use crate::doc::{DocId, Document, Field, IndexingMode, StoredDoc};
pub use crate::error::{Error, Result};
pub use crate::index::{Index, IndexBuilder};
pub use crate::reader::{IndexReader, SearchHit};
