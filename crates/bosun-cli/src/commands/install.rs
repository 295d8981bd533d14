use super::{json_pretty, with_spinner, Context, INVALID_PREFIX, EXIT_SUCCESS};
use bosun_core::InstallRequest;

pub fn run(ctx: &Context, app: &str, with: &[String]) -> Result<u8, String> {
    let mut req = InstallRequest::new(app);
    for choice in with {
        let (key, provider) = parse_choice(choice)?;
        // Repeating a key selects several providers for a multi slot.
        req.integrations
            .entry(key.to_owned())
            .and_modify(|v| {
                v.push(',');
                v.push_str(provider);
            })
            .or_insert_with(|| provider.to_owned());
    }

    let orch = ctx.orchestrator()?;
    let record = with_spinner(
        ctx.json,
        &format!("installing {app}..."),
        &format!("{app} installed"),
        &format!("install of {app} failed"),
        || orch.install(&req),
    )?;

    if ctx.json {
        println!("{}", json_pretty(&record)?);
    } else {
        println!("installed '{}' ({})", record.display_name, record.status);
    }
    Ok(EXIT_SUCCESS)
}

fn parse_choice(choice: &str) -> Result<(&str, &str), String> {
    match choice.split_once('=') {
        Some((key, provider)) if !key.trim().is_empty() && !provider.trim().is_empty() => {
            Ok((key.trim(), provider.trim()))
        }
        _ => Err(format!(
            "{INVALID_PREFIX} --with expects KEY=PROVIDER, got '{choice}'"
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_choice_splits_on_first_equals() {
        assert_eq!(
            parse_choice("downloadClient=qbittorrent").unwrap(),
            ("downloadClient", "qbittorrent")
        );
        assert_eq!(parse_choice(" sso = authentik ").unwrap(), ("sso", "authentik"));
    }

    #[test]
    fn parse_choice_rejects_malformed() {
        for bad in ["sso", "=authentik", "sso=", ""] {
            assert!(parse_choice(bad).unwrap_err().starts_with(INVALID_PREFIX));
        }
    }
}
