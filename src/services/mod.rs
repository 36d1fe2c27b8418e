pub mod crawl_service;
