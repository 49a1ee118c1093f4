pub mod assembler;
pub mod assets;
pub mod book;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod job;
pub mod parser;
pub mod pipeline;
pub mod retry;
pub mod sanitize;
pub mod store;
pub mod telemetry;

pub use book::{Book, BookContent, BookRepository};
pub use config::{load_config, load_config_from_str, ImportConfig};
pub use db::{Database, DatabaseError};
pub use document::{ExtractedImage, ParsedDocument};
pub use error::{ConfigError, ErrorCode, ImportError, Result};
pub use job::{
    ImportJob, ImportJobManager, ImportRequest, ImportSource, ImportType, JobFilter, JobPage,
    JobStatus, JobWarning,
};
pub use parser::{FormatParser, ParseError, ParserInput, ParserRegistry};
pub use pipeline::{Pipeline, PipelineConfig, PipelineContext, PipelineError};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore, StoreError};
