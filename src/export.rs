//! Dataset collection export as an encrypted CSV download
//!
//! Rows come from a database cursor behind [`DatasetRows`]. Each row becomes
//! one CSV line appended after the `index,content` header; the resulting file
//! goes through [`DeliveryPipeline::deliver_generated`].

use crate::config::ExportConfig;
use crate::delivery::{Delivery, DeliveryPipeline};
use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use utoipa::ToSchema;

/// One question/answer pair of a dataset collection
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRow {
    /// Question text
    pub q: String,
    /// Answer text
    pub a: String,
}

/// Which rows to export
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportQuery {
    /// Collection to export
    pub collection_id: String,

    /// Only export rows as they were before this instant
    #[serde(default)]
    #[schema(value_type = Option<String>, format = DateTime)]
    pub chat_time: Option<DateTime<Utc>>,
}

/// Stream of export rows, ordered by chunk index
pub type RowCursor = BoxStream<'static, Result<ExportRow>>;

/// Database access for exports
#[async_trait]
pub trait DatasetRows: Send + Sync {
    /// Open a cursor over the rows matching `query`
    ///
    /// Returns [`Error::NotFound`] if the collection does not exist.
    async fn open_cursor(&self, query: &ExportQuery) -> Result<RowCursor>;
}

/// Format a row as a CSV line, leading newline included
///
/// Both fields are quoted with embedded quotes doubled.
pub fn csv_line(row: &ExportRow) -> String {
    format!(
        "\n\"{}\",\"{}\"",
        row.q.replace('"', "\"\""),
        row.a.replace('"', "\"\"")
    )
}

/// Export a collection as an encrypted CSV delivery
///
/// At most `config.max_rows` rows are written. A cursor error aborts the
/// export; nothing is served and the staged file is removed.
///
/// # Errors
///
/// - [`Error::Validation`] for an empty collection id
/// - errors from [`DatasetRows::open_cursor`]
/// - [`Error::StageWrite`] when the cursor fails mid-export
/// - gateway errors from encrypting the file
pub async fn export_collection(
    pipeline: &DeliveryPipeline,
    rows: &dyn DatasetRows,
    query: &ExportQuery,
    config: &ExportConfig,
) -> Result<Delivery> {
    if query.collection_id.trim().is_empty() {
        return Err(Error::Validation("collectionId is required".to_string()));
    }

    let cursor = rows.open_cursor(query).await?;
    let max_rows = config.max_rows;
    let collection_id = query.collection_id.clone();

    debug!(%collection_id, max_rows, "exporting collection");
    let delivery = pipeline
        .deliver_generated(
            &config.header,
            move |writer| async move {
                let mut cursor = cursor.take(max_rows);
                let mut written: usize = 0;
                while let Some(row) = cursor.next().await {
                    writer.append(csv_line(&row?)).await?;
                    written += 1;
                }
                debug!(rows = written, "export cursor drained");
                Ok(())
            },
            &config.filename,
        )
        .await?;

    info!(
        collection_id = %query.collection_id,
        bytes = delivery.headers.content_length,
        "collection export ready"
    );
    Ok(delivery)
}
