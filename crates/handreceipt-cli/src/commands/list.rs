use handreceipt_core::models::TransferFilter;
use handreceipt_core::{QueuedTransfer, SyncState};

use crate::cli::StateArg;
use crate::commands::common::{
    format_transfer_lines, transfer_to_list_item, Context, TransferListItem,
};
use crate::error::CliError;

pub async fn run_list(
    ctx: &Context,
    property: Option<&str>,
    states: &[StateArg],
    as_json: bool,
) -> Result<(), CliError> {
    let queue = ctx.open_queue().await?;
    let filter = TransferFilter {
        property_id: property
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToString::to_string),
        sync_states: states.iter().copied().map(SyncState::from).collect(),
    };
    let records = queue.list(&filter).await?;
    print_records(&records, as_json, "Transfer queue is empty.")
}

pub async fn run_history(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let queue = ctx.open_queue().await?;
    let records = queue.history().await?;
    print_records(&records, as_json, "No synced transfers retained.")
}

fn print_records(records: &[QueuedTransfer], as_json: bool, empty: &str) -> Result<(), CliError> {
    if as_json {
        let json_items = records
            .iter()
            .map(transfer_to_list_item)
            .collect::<Vec<TransferListItem>>();
        println!("{}", serde_json::to_string_pretty(&json_items)?);
        return Ok(());
    }

    if records.is_empty() {
        println!("{empty}");
        return Ok(());
    }
    for line in format_transfer_lines(records) {
        println!("{line}");
    }
    Ok(())
}
