// Dataset commands: status, errors, reset

use anyhow::Result;
use featurestore::catalog::ErrorRecord;
use featurestore::DatasetCatalog;
use uuid::Uuid;

use super::{find_dataset, Context};
use crate::output::{frame_to_json, print_field, print_frame, print_table_header, print_table_row};

/// Rows shown per error slice in text output
const SLICE_PREVIEW_ROWS: usize = 10;

pub async fn status(ctx: &Context, dataset: &str) -> Result<()> {
    let catalog = ctx.catalog().await?;
    let record = find_dataset(&catalog, dataset).await?;
    let mut features = catalog.features(record.id).await?;
    features.sort_by(|a, b| a.position.cmp(&b.position).then_with(|| a.name.cmp(&b.name)));

    if ctx.output.is_text() {
        print_field("ID", &record.id.to_string());
        print_field("Name", &record.name);
        print_field("Status", &record.status.to_string());
        if let Some(fit_at) = record.fit_at {
            print_field("Fit at", &fit_at.format("%Y-%m-%d %H:%M:%S").to_string());
        }
        println!();
        if features.is_empty() {
            println!("No features found");
            return Ok(());
        }
        print_table_header(&[
            ("POS", 5),
            ("NAME", 24),
            ("VERSION", 8),
            ("STATUS", 8),
            ("STALE", 5),
            ("ID", 36),
        ]);
        for f in &features {
            print_table_row(&[
                (&f.position.to_string(), 5),
                (&f.name, 24),
                (&f.version, 8),
                (&f.status.to_string(), 8),
                (if f.needs_recompute() { "yes" } else { "no" }, 5),
                (&f.id.to_string(), 36),
            ]);
        }
    } else {
        ctx.output.print_value(&serde_json::json!({
            "dataset": record,
            "features": features,
        }))?;
    }
    Ok(())
}

pub async fn errors(ctx: &Context, dataset: &str, limit: usize, slice: bool) -> Result<()> {
    let catalog = ctx.catalog().await?;
    let record = find_dataset(&catalog, dataset).await?;
    let all = catalog.errors(record.id).await?;
    let shown = newest(&all, limit);

    if ctx.output.is_text() {
        if shown.is_empty() {
            println!("No errors recorded");
            return Ok(());
        }
        for (i, error) in shown.iter().enumerate() {
            if i > 0 {
                println!();
            }
            print_field("Recorded", &error.recorded_at.format("%Y-%m-%d %H:%M:%S").to_string());
            print_field("Kind", &error.kind.to_string());
            if let Some(feature_id) = error.feature_id {
                print_field("Feature", &feature_id.to_string());
            }
            if let (Some(batch_id), Some(unit)) = (&error.batch_id, error.unit_number) {
                print_field("Unit", &format!("{batch_id}#{unit}"));
            }
            print_field("Message", &error.message);
            for line in &error.trace {
                println!("    {line}");
            }
            if slice {
                match &error.slice {
                    Some(frame) if !frame.is_empty() => print_frame(frame, SLICE_PREVIEW_ROWS),
                    _ => println!("(no slice)"),
                }
            }
        }
        if !ctx.quiet && shown.len() < all.len() {
            println!();
            println!("Showing {} of {} errors", shown.len(), all.len());
        }
    } else {
        let entries: Vec<serde_json::Value> = shown
            .iter()
            .map(|error| error_to_json(error, slice))
            .collect();
        ctx.output.print_value(&serde_json::json!({
            "dataset_id": record.id,
            "total": all.len(),
            "errors": entries,
        }))?;
    }
    Ok(())
}

pub async fn reset_feature(ctx: &Context, feature_id: Uuid) -> Result<()> {
    let catalog = ctx.catalog().await?;
    catalog.reset_feature(feature_id).await?;
    let feature = catalog.feature(feature_id).await?;

    if ctx.output.is_text() {
        if !ctx.quiet {
            println!("Feature {} is now {}", feature.name, feature.status);
        }
    } else {
        ctx.output.print_value(&feature)?;
    }
    Ok(())
}

pub async fn reset_dataset(ctx: &Context, dataset: &str) -> Result<()> {
    let catalog = ctx.catalog().await?;
    let record = find_dataset(&catalog, dataset).await?;
    catalog.reset_dataset(record.id).await?;
    let record = catalog.dataset(record.id).await?;

    if ctx.output.is_text() {
        if !ctx.quiet {
            println!("Dataset {} is now {}", record.name, record.status);
        }
    } else {
        ctx.output.print_value(&record)?;
    }
    Ok(())
}

/// The last `limit` errors, oldest first
fn newest(errors: &[ErrorRecord], limit: usize) -> &[ErrorRecord] {
    &errors[errors.len().saturating_sub(limit)..]
}

fn error_to_json(error: &ErrorRecord, slice: bool) -> serde_json::Value {
    let mut value = serde_json::json!({
        "id": error.id,
        "feature_id": error.feature_id,
        "batch_id": error.batch_id,
        "unit_number": error.unit_number,
        "kind": error.kind,
        "message": error.message,
        "trace": error.trace,
        "recorded_at": error.recorded_at,
    });
    if slice {
        value["slice"] = error
            .slice
            .as_ref()
            .map(|frame| frame_to_json(frame, frame.len()))
            .unwrap_or(serde_json::Value::Null);
    }
    value
}
