use anyhow::{anyhow, Result};
use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

/// Master password for an existing vault.
pub const PASSWORD_ENV: &str = "EVOLS_PASSWORD";
/// Confirmation checked against `EVOLS_PASSWORD` when creating a vault.
pub const PASSWORD_CONFIRM_ENV: &str = "EVOLS_PASSWORD_CONFIRM";
/// New master password for `passwd`.
pub const NEW_PASSWORD_ENV: &str = "EVOLS_NEW_PASSWORD";

fn from_env(var: &str) -> Option<Zeroizing<String>> {
    std::env::var(var)
        .ok()
        .filter(|pw| !pw.is_empty())
        .map(Zeroizing::new)
}

pub fn password_once(prompt: &str) -> Result<Zeroizing<String>> {
    rpassword::prompt_password(format!("{prompt}: "))
        .map(Zeroizing::new)
        .map_err(|e| anyhow!("password prompt: {e}"))
}

/// Current master password: `$EVOLS_PASSWORD`, otherwise an echo-less prompt.
pub fn master_password() -> Result<Zeroizing<String>> {
    match from_env(PASSWORD_ENV) {
        Some(pw) => Ok(pw),
        None => password_once("Master password"),
    }
}

/// A password typed twice. `env` supplies it non-interactively, in which
/// case `confirm_env` (if set) must match.
pub fn password_twice(prompt: &str, env: &str, confirm_env: Option<&str>) -> Result<Zeroizing<String>> {
    if let Some(pw) = from_env(env) {
        if let Some(confirm) = confirm_env.and_then(from_env) {
            if *confirm != *pw {
                return Err(anyhow!("password confirmation mismatch"));
            }
        }
        return Ok(pw);
    }
    let first = password_once(prompt)?;
    let second = password_once("Confirm password")?;
    if *first != *second {
        return Err(anyhow!("passwords do not match"));
    }
    Ok(first)
}

/// One trimmed line from stdin, prompt on stderr.
pub fn read_line(prompt: &str) -> Result<String> {
    eprint!("{prompt}: ");
    io::stderr().flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(line.trim().to_owned())
}
