use floorsheet_datahub::store::SqliteStore;
use std::env;
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    let db_path = env::args().nth(1).unwrap_or_else(|| "data/floorsheet.db".to_string());

    // 打开即建表，已存在的表保持不变
    SqliteStore::open(&db_path)?;
    println!("Initialised floorsheet schema in {}", db_path);

    Ok(())
}
