use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let diff = with_spinner(
        ctx.json,
        "applying configuration...",
        "configuration applied",
        "apply failed",
        || orch.generate(),
    )?;
    if ctx.json {
        let payload = serde_json::json!({
            "output": orch.generator().output_path(),
            "changes": diff,
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("wrote {}", orch.generator().output_path().display());
        for line in diff.lines() {
            println!("  {line}");
        }
    }
    Ok(EXIT_SUCCESS)
}
