use anyhow::Result;
use std::io::{self, IsTerminal, Write};
use std::path::Path;

/// True when the session reads from a terminal and should show a prompt.
pub fn is_interactive() -> bool {
  io::stdin().is_terminal()
}

/// Write `jsh:<cwd>$ ` to stderr.
pub fn shell_prompt(cwd: &Path) -> Result<()> {
  let mut stderr = io::stderr();
  write!(stderr, "{}", prompt_text(cwd))?;
  stderr.flush()?;
  Ok(())
}

fn prompt_text(cwd: &Path) -> String {
  format!("jsh:{}$ ", cwd.display())
}
