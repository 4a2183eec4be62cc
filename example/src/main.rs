use pgmini::{Config, Connection};

mod admin;
mod table;

fn main() -> pgmini::Result<()> {
    env_logger::init();

    let config = Config::new("127.0.0.1", "postgres")
        .password("123456")
        .database("postgres");

    let mut conn = Connection::connect(config.clone())?;
    table::run(&mut conn)?;
    conn.close();

    admin::run(config)?;

    Ok(())
}
