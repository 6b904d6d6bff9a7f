//! Prints the effective configuration with credentials redacted.

use anyhow::Result;

use crate::config::Config;

pub(crate) fn run(config: &Config) -> Result<()> {
    print!("{}", config.redacted_toml()?);
    Ok(())
}
