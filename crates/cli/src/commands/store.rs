// Feature version commands: partitions, query, wipe, copy-version

use std::io::Write;

use anyhow::{Context as _, Result};
use featurestore::KeyPredicate;
use serde::Serialize;

use super::{Context, LocationArgs};
use crate::output::{frame_to_json, print_field, print_frame, print_table_header, print_table_row};

#[derive(Debug, Serialize)]
struct PartitionRow {
    index: i64,
    key_start: i64,
    key_end: i64,
    path: String,
    bytes: u64,
}

pub async fn partitions(ctx: &Context, args: LocationArgs) -> Result<()> {
    let store = ctx.store(&args).await?;
    let mut rows = Vec::new();
    for p in store.list_partitions().await? {
        let bytes = tokio::fs::metadata(&p.path)
            .await
            .map(|m| m.len())
            .unwrap_or_default();
        rows.push(PartitionRow {
            index: p.index,
            key_start: p.key_start,
            key_end: p.key_end,
            path: p.path.display().to_string(),
            bytes,
        });
    }
    let unpartitioned = store.has_unpartitioned().await?;

    if ctx.output.is_text() {
        print_field("Directory", &store.dir().display().to_string());
        print_field("Partition size", &store.partition_size().to_string());
        if unpartitioned {
            print_field("Unpartitioned", "feature.parquet");
        }
        if rows.is_empty() {
            println!("No partitions found");
            return Ok(());
        }
        print_table_header(&[("INDEX", 8), ("KEY START", 12), ("KEY END", 12), ("BYTES", 10)]);
        for row in &rows {
            print_table_row(&[
                (&row.index.to_string(), 8),
                (&row.key_start.to_string(), 12),
                (&row.key_end.to_string(), 12),
                (&row.bytes.to_string(), 10),
            ]);
        }
    } else {
        ctx.output.print_value(&serde_json::json!({
            "dir": store.dir().display().to_string(),
            "partition_size": store.partition_size(),
            "unpartitioned": unpartitioned,
            "partitions": rows,
        }))?;
    }
    Ok(())
}

pub async fn query(
    ctx: &Context,
    args: LocationArgs,
    keys: Vec<i64>,
    start: Option<i64>,
    end: Option<i64>,
    limit: usize,
) -> Result<()> {
    let predicate = if !keys.is_empty() {
        KeyPredicate::keys(keys)
    } else if start.is_some() || end.is_some() {
        KeyPredicate::Range { start, end }
    } else {
        KeyPredicate::All
    };
    let store = ctx.store(&args).await?;
    let result = store.read(&predicate).await?;

    if ctx.output.is_text() {
        if !ctx.quiet {
            let opened = result
                .partitions_read
                .iter()
                .map(i64::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            let opened: &str = if opened.is_empty() { "-" } else { &opened };
            print_field("Partitions", opened);
            print_field("Rows", &result.frame.len().to_string());
        }
        if result.frame.is_empty() {
            println!("No rows found");
        } else {
            print_frame(&result.frame, limit);
        }
    } else {
        ctx.output.print_value(&serde_json::json!({
            "partitions_read": result.partitions_read,
            "unpartitioned_read": result.unpartitioned_read,
            "total": result.frame.len(),
            "rows": frame_to_json(&result.frame, limit),
        }))?;
    }
    Ok(())
}

pub async fn wipe(ctx: &Context, args: LocationArgs, yes: bool) -> Result<()> {
    let store = ctx.store(&args).await?;
    if !yes && !confirm(&format!("Delete {}?", store.dir().display()))? {
        println!("Aborted");
        return Ok(());
    }
    store.wipe().await?;

    if ctx.output.is_text() && !ctx.quiet {
        println!("Wiped {}", store.dir().display());
    } else if !ctx.output.is_text() {
        ctx.output.print_value(&serde_json::json!({
            "dir": store.dir().display().to_string(),
            "status": "wiped",
        }))?;
    }
    Ok(())
}

pub async fn copy_version(ctx: &Context, args: LocationArgs, to: &str) -> Result<()> {
    let store = ctx.store(&args).await?;
    if store.is_empty().await? {
        anyhow::bail!("Nothing stored at {}", store.dir().display());
    }
    let copy = store.copy_version(to).await?;

    if ctx.output.is_text() {
        if ctx.quiet {
            println!("{}", copy.dir().display());
        } else {
            println!("Copied {} -> {}", store.dir().display(), copy.dir().display());
        }
    } else {
        ctx.output.print_value(&serde_json::json!({
            "from": store.dir().display().to_string(),
            "to": copy.dir().display().to_string(),
        }))?;
    }
    Ok(())
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} [y/N] ");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin()
        .read_line(&mut answer)
        .context("Failed to read confirmation")?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}
