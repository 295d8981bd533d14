use super::{describe, json_pretty, Context, EXIT_SUCCESS};
use bosun_core::CoreError;
use bosun_store::AttemptStatus;

pub fn run(ctx: &Context, app: Option<&str>, limit: usize) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let mut attempts = orch
        .attempts()
        .list()
        .map_err(|e| describe(&CoreError::from(e)))?;
    if let Some(app) = app {
        attempts.retain(|a| a.app.as_deref() == Some(app));
    }
    let skip = attempts.len().saturating_sub(limit);
    let attempts = &attempts[skip..];

    if ctx.json {
        println!("{}", json_pretty(&attempts)?);
    } else if attempts.is_empty() {
        println!("no attempts recorded");
    } else {
        println!("{:<26} {:<10} {:<16} {:<8} ERROR", "STARTED", "TRIGGER", "APP", "STATUS");
        for a in attempts {
            let status = match a.status {
                AttemptStatus::Success => console::style("success").green().to_string(),
                AttemptStatus::Failed => console::style("failed ").red().to_string(),
                AttemptStatus::Running => console::style("running").cyan().to_string(),
            };
            println!(
                "{:<26} {:<10} {:<16} {} {}",
                a.started_at.get(..26).unwrap_or(&a.started_at),
                a.trigger,
                a.app.as_deref().unwrap_or("-"),
                status,
                a.error.as_deref().unwrap_or("")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
