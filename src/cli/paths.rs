use anyhow::Result;

use crate::paths::Paths;

pub fn run() -> Result<()> {
    let paths = Paths::resolve()?;

    println!("config:  {}", paths.config_dir.display());
    println!("data:    {}", paths.data_dir.display());
    println!("state:   {}", paths.state_dir.display());
    println!();
    println!("config file:   {}", paths.config_file().display());
    println!("key store:     {}", paths.keys_file().display());
    println!("archive:       {}", paths.archive_dir().display());
    println!("history:       {}", paths.history_file().display());

    Ok(())
}
