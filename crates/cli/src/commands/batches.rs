// Batch argument inspection

use anyhow::{Context as _, Result};
use featurestore::coordinator::BatchArgsStore;
use featurestore::{BatchId, FileBatchArgsStore};

use super::Context;
use crate::output::{print_field, print_table_header, print_table_row};

pub async fn batch_args(ctx: &Context, batch_id: String) -> Result<()> {
    let batch_id = BatchId::from(batch_id);
    let store = FileBatchArgsStore::new(ctx.root());
    let units = store
        .get(&batch_id)
        .await?
        .with_context(|| format!("Batch not found: {batch_id}"))?;

    if ctx.output.is_text() {
        if let Some(first) = units.first() {
            print_field("Batch", batch_id.as_str());
            print_field("Feature", &first.feature_name);
            print_field("Position", &first.position.to_string());
            print_field("Units", &units.len().to_string());
            println!();
        }
        print_table_header(&[("UNIT", 6), ("SELECTION", 40), ("DEPENDENCIES", 24)]);
        for unit in &units {
            let selection = serde_json::to_string(&unit.selection)?;
            let deps = unit
                .dependencies
                .iter()
                .map(|d| d.name.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let deps: &str = if deps.is_empty() { "-" } else { &deps };
            print_table_row(&[
                (&unit.unit_number.to_string(), 6),
                (&selection, 40),
                (deps, 24),
            ]);
        }
    } else {
        ctx.output.print_value(&units)?;
    }
    Ok(())
}
