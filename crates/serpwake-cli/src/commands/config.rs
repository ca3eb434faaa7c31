/// Configuration command handlers
use anyhow::Result;
use serpwake_core::{config::default_config_path, Config};

pub fn handle_config_show(config: &Config) -> Result<()> {
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn handle_config_path() -> Result<()> {
    let path = default_config_path()?;
    let state = if path.exists() { "" } else { " (not created)" };
    println!("{}{state}", path.display());
    Ok(())
}
