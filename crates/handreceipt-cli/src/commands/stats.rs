use crate::commands::common::{format_sync_timestamp, Context};
use crate::error::CliError;

pub async fn run_stats(ctx: &Context, as_json: bool) -> Result<(), CliError> {
    let queue = ctx.open_queue().await?;
    let stats = queue.stats().await?;

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!("Queued:             {}", stats.total);
    println!("  pending:          {}", stats.pending);
    println!("  syncing:          {}", stats.syncing);
    println!("  failed:           {}", stats.failed);
    println!("  needs attention:  {}", stats.requires_attention);
    println!("Synced history:     {}", stats.completed_history);
    println!(
        "Last sync:          {}",
        stats
            .last_sync_at
            .map_or_else(|| "never".to_string(), format_sync_timestamp)
    );
    Ok(())
}
