//! Application collection schema

use bson::{doc, Document};
use mongodb::options::IndexOptions;

use crate::db::mongo::IntoIndexes;
use crate::registry::Application;

/// Collection name for registered applications
pub const APPLICATION_COLLECTION: &str = "applications";

impl IntoIndexes for Application {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![
            (
                doc! { "id": 1 },
                Some(IndexOptions::builder().unique(true).name("id_unique".to_string()).build()),
            ),
            // Names stay unique across active and inactive records
            (
                doc! { "name": 1 },
                Some(IndexOptions::builder().unique(true).name("name_unique".to_string()).build()),
            ),
        ]
    }
}
