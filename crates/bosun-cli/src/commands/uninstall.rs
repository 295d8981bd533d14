use super::{json_pretty, with_spinner, Context, EXIT_SUCCESS};

pub fn run(ctx: &Context, app: &str) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    with_spinner(
        ctx.json,
        &format!("uninstalling {app}..."),
        &format!("{app} uninstalled"),
        &format!("uninstall of {app} failed"),
        || orch.uninstall(app),
    )?;
    if ctx.json {
        let payload = serde_json::json!({ "app": app, "status": "uninstalled" });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!("uninstalled '{app}'");
    }
    Ok(EXIT_SUCCESS)
}
