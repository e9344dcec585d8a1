use handreceipt_core::models::HttpMethod;
use handreceipt_core::services::OfflineRequestQueue;
use handreceipt_core::sync::SubmitOutcome;

use crate::cli::RequestCommands;
use crate::commands::common::{format_request_lines, Context};
use crate::error::CliError;

pub async fn run_requests(ctx: &Context, command: RequestCommands) -> Result<(), CliError> {
    match command {
        RequestCommands::Submit {
            method,
            endpoint,
            data,
            offline,
        } => {
            let data = parse_request_body(data.as_deref())?;
            run_submit(ctx, method.into(), &endpoint, data, offline).await
        }
        RequestCommands::List { json } => {
            let requests = open_requests(ctx).await?.list().await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&requests)?);
            } else if requests.is_empty() {
                println!("No queued requests.");
            } else {
                for line in format_request_lines(&requests) {
                    println!("{line}");
                }
            }
            Ok(())
        }
        RequestCommands::Drop { id } => {
            let id = id.trim();
            if !open_requests(ctx).await?.remove(id).await? {
                return Err(CliError::RequestNotFound(id.to_string()));
            }
            println!("Dropped request {id}");
            Ok(())
        }
    }
}

async fn run_submit(
    ctx: &Context,
    method: HttpMethod,
    endpoint: &str,
    data: Option<serde_json::Value>,
    offline: bool,
) -> Result<(), CliError> {
    if offline {
        let request = open_requests(ctx).await?.push(method, endpoint, data).await?;
        println!("Queued {} {} as {}", request.method, request.endpoint, request.id);
        return Ok(());
    }

    let (orchestrator, _signal) = ctx.open_orchestrator().await?;
    match orchestrator.submit_request(method, endpoint, data).await? {
        SubmitOutcome::Sent => println!("Sent {method} {endpoint}"),
        SubmitOutcome::Queued(request) => {
            println!("Queued {} {} as {}", request.method, request.endpoint, request.id);
        }
    }
    Ok(())
}

async fn open_requests(ctx: &Context) -> Result<OfflineRequestQueue, CliError> {
    let queue = ctx.open_queue().await?;
    Ok(OfflineRequestQueue::new(queue.shared_database()))
}

pub fn parse_request_body(raw: Option<&str>) -> Result<Option<serde_json::Value>, CliError> {
    match raw.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => Ok(Some(serde_json::from_str(value)?)),
        None => Ok(None),
    }
}
