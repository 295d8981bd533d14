use super::{describe, json_pretty, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let diff = orch.plan().map_err(|e| describe(&e))?;
    if ctx.json {
        println!("{}", json_pretty(&diff)?);
    } else {
        for line in diff.lines() {
            println!("{line}");
        }
    }
    Ok(EXIT_SUCCESS)
}
