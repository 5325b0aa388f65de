// src/config/mod.rs
pub mod ingest;

pub use ingest::{
    ArticleSettings, HtmlSettings, HttpSettings, IcsSettings, IngestConfig, ScheduleSettings,
    StoreSettings,
};
