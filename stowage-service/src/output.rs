//! Terminal output formatting for the `stowage` CLI driver. Uses
//! comfy-table for tabular output and colored for severity-aware
//! terminal styling, the same pairing the service surface's teacher
//! uses for its own reports.

use colored::Colorize;
use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, ContentArrangement, Table};

use stowage_service::dto::{
    BackupMetadataDto, CollectionSummaryDto, RecordDto, SearchCollectionsResponse, SearchResponse,
};
use stowage_service::status::Status;

/// Print a `Status` as a colored one-line summary.
pub fn print_status(status: &Status) {
    if status.is_ok() {
        println!("{}", "ok".green());
    } else {
        println!("{} {:?}: {}", "error".red().bold(), status.code, status.message);
    }
}

pub fn print_record(record: &RecordDto) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Field"), Cell::new("Value")]);
    table.add_row(vec![Cell::new("id"), Cell::new(&record.id)]);
    table.add_row(vec![
        Cell::new("json_projection"),
        Cell::new(record.json_projection.to_string()),
    ]);
    table.add_row(vec![
        Cell::new("data_uri"),
        Cell::new(record.data_uri.as_deref().unwrap_or("")),
    ]);
    table.add_row(vec![
        Cell::new("labels"),
        Cell::new(format!("{:?}", record.labels)),
    ]);
    table.add_row(vec![Cell::new("created_at"), Cell::new(record.created_at)]);
    table.add_row(vec![Cell::new("updated_at"), Cell::new(record.updated_at)]);
    println!("{table}");
}

pub fn print_records_table(records: &[RecordDto]) {
    if records.is_empty() {
        println!("{}", "No records found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("ID"),
            Cell::new("Labels"),
            Cell::new("Created"),
            Cell::new("Updated"),
        ]);

    for record in records {
        table.add_row(vec![
            Cell::new(&record.id),
            Cell::new(format!("{:?}", record.labels)),
            Cell::new(record.created_at),
            Cell::new(record.updated_at),
        ]);
    }
    println!("{table}");
}

pub fn print_search_results(response: &SearchResponse) {
    if response.hits.is_empty() {
        println!("{}", "No matches.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("ID"), Cell::new("Score")]);

    for hit in &response.hits {
        table.add_row(vec![Cell::new(&hit.id), Cell::new(format!("{:.4}", hit.score))]);
    }
    println!("{table}");
}

pub fn print_cross_collection_hits(response: &SearchCollectionsResponse) {
    if response.hits.is_empty() {
        println!("{}", "No matches.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Namespace"),
            Cell::new("Collection"),
            Cell::new("ID"),
            Cell::new("Score"),
        ]);

    for hit in &response.hits {
        table.add_row(vec![
            Cell::new(&hit.namespace),
            Cell::new(&hit.name),
            Cell::new(&hit.id),
            Cell::new(format!("{:.4}", hit.score)),
        ]);
    }
    println!("{table}");
}

pub fn print_collections_table(collections: &[CollectionSummaryDto]) {
    if collections.is_empty() {
        println!("{}", "No collections found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Namespace"),
            Cell::new("Name"),
            Cell::new("Type"),
            Cell::new("Created"),
        ]);

    for c in collections {
        table.add_row(vec![
            Cell::new(&c.namespace),
            Cell::new(&c.name),
            Cell::new(&c.message_type),
            Cell::new(c.created_at),
        ]);
    }
    println!("{table}");
}

pub fn print_backups_table(backups: &[BackupMetadataDto]) {
    if backups.is_empty() {
        println!("{}", "No backups found.".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Backup ID"),
            Cell::new("Collection"),
            Cell::new("Timestamp"),
            Cell::new("Size"),
            Cell::new("Records"),
        ]);

    for b in backups {
        table.add_row(vec![
            Cell::new(&b.backup_id),
            Cell::new(format!("{}/{}", b.namespace, b.name)),
            Cell::new(b.timestamp),
            Cell::new(b.size_bytes),
            Cell::new(b.record_count),
        ]);
    }
    println!("{table}");
}
