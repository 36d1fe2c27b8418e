use std::env;
use std::fs;
use std::path::Path;

fn main() {
    // 获取项目根目录
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();

    // 确保data目录存在
    let data_dir = Path::new(&manifest_dir).join("data");
    if !data_dir.exists() {
        fs::create_dir_all(&data_dir).expect("Failed to create data directory");
    }

    if !data_dir.join("floorsheet.db").exists() {
        println!("cargo:warning=data/floorsheet.db not found; it is created on the first 'scrape' run.");
    }
    println!("cargo:rerun-if-changed=build.rs");
}
