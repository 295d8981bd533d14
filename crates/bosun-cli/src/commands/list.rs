use super::{colorize_status, describe, json_pretty, Context, EXIT_SUCCESS};
use bosun_core::CoreError;

pub fn run(ctx: &Context, all: bool) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let records: Vec<_> = orch
        .records()
        .list()
        .map_err(|e| describe(&CoreError::from(e)))?
        .into_iter()
        .filter(|r| all || !r.is_system)
        .collect();

    if ctx.json {
        println!("{}", json_pretty(&records)?);
    } else if records.is_empty() {
        println!("no apps installed");
    } else {
        println!("{:<20} {:<14} {:<10} {:<6} INTEGRATIONS", "NAME", "STATUS", "VERSION", "PORT");
        for r in &records {
            let integrations: Vec<String> = r
                .integration_config
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            // Escape codes would throw off `{:<14}`.
            let pad = 14usize.saturating_sub(r.status.as_str().len());
            println!(
                "{:<20} {} {:<10} {:<6} {}",
                r.name.as_str(),
                colorize_status(r.status.as_str()) + &" ".repeat(pad),
                r.version,
                r.port,
                integrations.join(",")
            );
        }
    }
    Ok(EXIT_SUCCESS)
}
