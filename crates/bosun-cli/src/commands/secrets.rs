use super::{describe, json_pretty, Context, EXIT_SUCCESS};
use bosun_core::StoreLock;

pub fn render(ctx: &Context) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let _lock = StoreLock::acquire(&orch.layout().lock_file())
        .map_err(|e| format!("store lock: {e}"))?;
    let written = orch.render_secrets().map_err(|e| describe(&e))?;
    if ctx.json {
        println!("{}", json_pretty(&written)?);
    } else {
        for path in &written {
            println!("{}", path.display());
        }
    }
    Ok(EXIT_SUCCESS)
}
