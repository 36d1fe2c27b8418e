use floorsheet_datahub::store::SqliteStore;
use std::env;
use std::error::Error;
use std::path::Path;

fn main() -> Result<(), Box<dyn Error>> {
    let db_path = env::args().nth(1).unwrap_or_else(|| "data/floorsheet.db".to_string());

    // 检查数据文件是否存在
    if !Path::new(&db_path).exists() {
        return Err(format!("{} not found, run 'cargo run -- scrape' first", db_path).into());
    }

    let store = SqliteStore::open(&db_path)?;
    match store.latest_complete_date("")? {
        // 输出纯日期，供 CI 脚本读取
        Some(date) => println!("{}", date.format("%Y-%m-%d")),
        None => return Err("no completed floorsheet date in progress log".into()),
    }

    Ok(())
}
