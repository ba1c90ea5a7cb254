// docfile-core/src/lib.rs
// Embedded document store: one JSON file per collection, Mongo-style queries

pub mod error;
pub mod value;
pub mod path;
pub mod query;
pub mod update;
pub mod expression;
pub mod aggregation;
pub mod bulk;
pub mod config;
pub mod storage;
pub mod document;
pub mod find_options;
pub mod collection_core;
pub mod database;

// Public exports
pub use error::{DocFileError, Result};
pub use path::{get_path, set_path, FieldPath};
pub use query::{matches, Query, QueryOperator};
pub use update::{apply_update, UpdateOperator};
pub use expression::eval_expr;
pub use aggregation::{aggregate, Pipeline};
pub use bulk::{bulk_write, BulkWriteResult, WriteModel};
pub use config::StoreConfig;
pub use storage::CollectionFile;
pub use document::{generate_id, Document};
pub use find_options::{FindOptions, SortSpec};
pub use collection_core::{
    CollectionCore, DeleteResult, FindOneAndUpdateOptions, FindQuery, InsertManyResult,
    ReturnDocument, UpdateOptions, UpdateResult,
};
pub use database::DatabaseCore;
