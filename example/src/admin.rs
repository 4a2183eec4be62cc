use log::info;
use pgmini::Config;

pub fn run(config: Config) -> pgmini::Result<()> {
    pgmini::create_database(config.clone(), "test_database")?;
    info!("database created");

    pgmini::drop_database(config, "test_database")?;
    info!("database dropped");

    Ok(())
}
