use super::{colorize_status, describe, json_pretty, Context, INVALID_PREFIX, EXIT_SUCCESS};
use bosun_core::CoreError;

pub fn run(ctx: &Context, app: &str) -> Result<u8, String> {
    let orch = ctx.orchestrator()?;
    let record = orch
        .records()
        .get(app)
        .map_err(|e| describe(&CoreError::from(e)))?
        .ok_or_else(|| format!("{INVALID_PREFIX} app not installed: {app}"))?;
    let definition = orch.catalog().get(app);
    let container = match orch.container(app) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!("{app}: container state unavailable: {e}");
            None
        }
    };

    if ctx.json {
        let payload = serde_json::json!({
            "record": record,
            "catalog": definition,
            "container": container,
        });
        println!("{}", json_pretty(&payload)?);
        return Ok(EXIT_SUCCESS);
    }

    println!("name:          {}", record.name);
    println!("display_name:  {}", record.display_name);
    println!("status:        {}", colorize_status(record.status.as_str()));
    println!("version:       {}", record.version);
    println!("port:          {}", record.port);
    println!("system:        {}", record.is_system);
    if record.integration_config.is_empty() {
        println!("integrations:  (none)");
    } else {
        println!("integrations:");
        for (key, provider) in &record.integration_config {
            println!("  {key} = {provider}");
        }
    }
    println!("installed_at:  {}", record.installed_at);
    println!("updated_at:    {}", record.updated_at);
    match definition {
        Some(def) => println!("image:         {}", def.image),
        None => println!("image:         (not in catalog)"),
    }
    match container {
        Some(c) => println!("container:     {} ({})", c.state.as_str(), &c.id[..c.id.len().min(12)]),
        None => println!("container:     (none)"),
    }
    Ok(EXIT_SUCCESS)
}
