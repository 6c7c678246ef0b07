use crate::config::Config;

pub fn cmd_init() -> anyhow::Result<()> {
    if Config::create_default_if_missing()? {
        println!("Created tacman.toml with default settings.");
        println!("Edit [export] directory to point at the tac_plus-ng configuration directory.");
    } else {
        println!("tacman.toml already exists; left unchanged.");
    }
    Ok(())
}
