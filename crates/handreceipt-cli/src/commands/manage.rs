use crate::commands::common::{resolve_transfer_id, Context};
use crate::error::CliError;

pub async fn run_cancel(ctx: &Context, id: &str) -> Result<(), CliError> {
    let queue = ctx.open_queue().await?;
    let id = resolve_transfer_id(id, &queue).await?;
    let record = queue.cancel(&id).await?;
    if record.commit_attempted {
        println!("Cancelled {id}; the server already saw a commit and has the final say");
    } else {
        println!("Cancelled {id}");
    }
    Ok(())
}

pub async fn run_acknowledge(ctx: &Context, id: &str) -> Result<(), CliError> {
    let queue = ctx.open_queue().await?;
    let id = resolve_transfer_id(id, &queue).await?;
    queue.acknowledge(&id).await?;
    println!("Acknowledged and removed {id}");
    Ok(())
}
