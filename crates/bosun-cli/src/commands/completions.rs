use super::EXIT_SUCCESS;
use clap::CommandFactory;
use clap_complete::Shell;
use std::io::Write;
use std::path::Path;

/// Completion script for `shell`, named after the command's binary.
pub fn write_script<C: CommandFactory>(shell: Shell, out: &mut dyn Write) {
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    clap_complete::generate(shell, &mut cmd, bin, out);
}

/// Print the script, or write it into `dir` under the shell's file name.
pub fn run<C: CommandFactory>(shell: Shell, dir: Option<&Path>) -> Result<u8, String> {
    let Some(dir) = dir else {
        write_script::<C>(shell, &mut std::io::stdout().lock());
        return Ok(EXIT_SUCCESS);
    };
    std::fs::create_dir_all(dir)
        .map_err(|e| format!("failed to create {}: {e}", dir.display()))?;
    let mut cmd = C::command();
    let bin = cmd.get_name().to_owned();
    let path = clap_complete::generate_to(shell, &mut cmd, bin, dir)
        .map_err(|e| format!("failed to write {shell} completions: {e}"))?;
    println!("{shell} completions written to {}", path.display());
    Ok(EXIT_SUCCESS)
}
