//! Config file commands.

use std::path::Path;

use anyhow::{bail, Context};

use bdk_driver::DriverConfig;

use super::CommandResult;

pub fn show(path: &Path) -> CommandResult {
    let config =
        DriverConfig::load(path).with_context(|| format!("loading {}", path.display()))?;
    if !path.exists() {
        println!("# {} does not exist; showing defaults\n", path.display());
    }
    print!("{}", config.to_toml()?);
    Ok(())
}

pub fn path(path: &Path) {
    println!("{}", path.display());
}

pub fn init(path: &Path, force: bool) -> CommandResult {
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    DriverConfig::default().save(path)?;
    println!("Wrote {}", path.display());
    Ok(())
}
