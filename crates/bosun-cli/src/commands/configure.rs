use super::{describe, json_pretty, Context, EXIT_FAILURE, EXIT_SUCCESS};
use bosun_core::HookKind;

/// One hook invocation. Diagnostics go to stderr; stdout stays empty unless
/// `--json` asks for a result object.
pub fn hook(ctx: &Context, kind: HookKind, app: &str) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    orch.dispatch(kind, app).map_err(|e| describe(&e))?;
    if ctx.json {
        let status = orch
            .records()
            .get(app)
            .map_err(|e| e.to_string())?
            .map(|r| r.status.to_string());
        let payload = serde_json::json!({
            "hook": kind.to_string(),
            "app": app,
            "status": status,
        });
        println!("{}", json_pretty(&payload)?);
    }
    Ok(EXIT_SUCCESS)
}

pub fn reconcile(ctx: &Context) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let report = orch.reconcile().map_err(|e| describe(&e))?;
    if ctx.json {
        println!("{}", json_pretty(&report)?);
    } else {
        for app in &report.succeeded {
            println!("ok       {app}");
        }
        for app in &report.skipped {
            println!("skipped  {app}");
        }
        for (app, err) in &report.failed {
            println!("failed   {app}: {err}");
        }
    }
    if report.cancelled {
        eprintln!("reconcile cancelled");
        return Ok(EXIT_FAILURE);
    }
    report.into_result().map_err(|e| describe(&e))?;
    Ok(EXIT_SUCCESS)
}
