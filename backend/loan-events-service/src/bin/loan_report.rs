//! Prints loan portfolio figures from the store as JSON
//!
//! ```bash
//! loan-report summary
//! loan-report recent 20
//! ```

use anyhow::{bail, Context, Result};
use db_pool::create_pool;
use loan_events_service::config::store_config_from_env;
use loan_events_service::services::LoanReadModel;
use loan_events_service::telemetry::init_tracing;

const DEFAULT_RECENT_LIMIT: i64 = 10;

enum Command {
    Summary,
    Recent(i64),
}

fn parse_args(args: &[String]) -> Result<Command> {
    match args.first().map(String::as_str) {
        None | Some("summary") => Ok(Command::Summary),
        Some("recent") => {
            let limit = match args.get(1) {
                Some(raw) => raw
                    .parse::<i64>()
                    .with_context(|| format!("Invalid limit '{}'", raw))?,
                None => DEFAULT_RECENT_LIMIT,
            };
            if limit <= 0 {
                bail!("Limit must be positive");
            }
            Ok(Command::Recent(limit))
        }
        Some(other) => bail!("Unknown command '{}'. Usage: loan-report [summary | recent [N]]", other),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    init_tracing("warn,loan_report=info");

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = parse_args(&args)?;

    let store = store_config_from_env("loan-report").context("Invalid store configuration")?;
    let pool = create_pool(store)
        .await
        .context("Failed to connect to the loan store")?;
    let read_model = LoanReadModel::new(pool.clone());

    match command {
        Command::Summary => {
            let summary = read_model.summary().await.context("Summary query failed")?;
            if summary.is_empty() {
                eprintln!("No loan events stored yet, waiting for data");
            }
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Command::Recent(limit) => {
            let events = read_model
                .recent_events(limit)
                .await
                .context("Recent events query failed")?;
            if events.is_empty() {
                eprintln!("No loan events stored yet, waiting for data");
            }
            println!("{}", serde_json::to_string_pretty(&events)?);
        }
    }

    pool.close().await;
    Ok(())
}
