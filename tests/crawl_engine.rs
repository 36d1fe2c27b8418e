mod common;

use common::{config, date, Day, Fault, FlakySink, ScriptedSource, ROWS_PER_PAGE};
use floorsheet_datahub::models::crawl::CrawlState;
use floorsheet_datahub::models::progress::DateStatus;
use floorsheet_datahub::models::trade::FilterSet;
use floorsheet_datahub::services::crawl_service::CrawlService;
use floorsheet_datahub::store::{SqliteStore, TradeSink};
use floorsheet_datahub::FloorsheetError;
use std::sync::Arc;

fn store() -> Arc<SqliteStore> {
    Arc::new(SqliteStore::in_memory().unwrap())
}

#[tokio::test]
async fn two_day_range_persists_pages_and_skips_empty_day() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2)), (date(5), Day::NoData)]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(6)), source.clone(), store.clone());

    let summary = service.run().await.unwrap();

    assert_eq!(store.count_trades(date(4)).unwrap(), 6);
    assert_eq!(store.count_trades(date(5)).unwrap(), 0);
    assert_eq!(summary.dates_completed, 1);
    assert_eq!(summary.dates_skipped, 1);
    assert_eq!(summary.records_persisted, 6);
    assert!(!summary.cancelled);
    assert_eq!(service.state(), CrawlState::Idle);

    let log = store.progress_log().unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!((log[0].trade_date, log[0].status), (date(4), DateStatus::Complete));
    assert_eq!((log[0].pages_completed, log[0].pages_total), (2, 2));
    assert_eq!((log[1].trade_date, log[1].status), (date(5), DateStatus::Skipped));

    // 探测页被复用，第 1 页只请求一次
    assert_eq!(source.page_calls(), vec![(date(4), 1), (date(4), 2), (date(5), 1)]);
    assert_eq!(source.initial_calls(), 1);
    assert_eq!(source.stale_submissions(), 0);
}

#[tokio::test]
async fn empty_range_fetches_nothing() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(4)), source.clone(), store.clone());

    let summary = service.run().await.unwrap();

    assert!(source.calls().is_empty());
    assert_eq!(summary.pages_fetched, 0);
    assert!(store.progress_log().unwrap().is_empty());
}

#[tokio::test]
async fn transient_failure_refetches_the_same_page() {
    let source = Arc::new(
        ScriptedSource::new(vec![(date(4), Day::Pages(7))]).with_faults(date(4), 3, vec![Fault::Transport]),
    );
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    let summary = service.run().await.unwrap();

    let pages: Vec<u32> = source.page_calls().into_iter().map(|(_, p)| p).collect();
    assert_eq!(pages, vec![1, 2, 3, 3, 4, 5, 6, 7]);
    // 失败后重新建立会话，而不是重放已用过的令牌
    assert_eq!(source.initial_calls(), 2);
    assert_eq!(source.stale_submissions(), 0);
    assert_eq!(summary.retries, 1);

    let rows = store.trades_for_date(date(4)).unwrap();
    assert_eq!(rows.len(), (7 * ROWS_PER_PAGE) as usize);
    let sequences: Vec<u32> = rows.iter().map(|r| r.row_sequence_in_page).collect();
    assert_eq!(sequences, (1..=7 * ROWS_PER_PAGE).collect::<Vec<_>>());
}

#[tokio::test]
async fn retry_ceiling_gives_up_and_records_failure() {
    let source = Arc::new(
        ScriptedSource::new(vec![(date(4), Day::Pages(3)), (date(5), Day::Pages(1))])
            .with_faults(date(4), 2, vec![Fault::Transport; 10]),
    );
    let store = store();
    let cfg = config(date(4), date(6)).with_max_retries(Some(3));
    let mut service = CrawlService::new(cfg, source.clone(), store.clone());

    let err = service.run().await.unwrap_err();

    match err {
        FloorsheetError::RetriesExhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(*last, FloorsheetError::Transport(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(source.page_calls().iter().all(|(d, _)| *d == date(4)));
    assert_eq!(store.count_trades(date(4)).unwrap(), ROWS_PER_PAGE as usize);

    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!(latest.status, DateStatus::Failed);
    assert_eq!(latest.pages_completed, 1);
}

#[tokio::test]
async fn malformed_table_aborts_the_run() {
    let source = Arc::new(
        ScriptedSource::new(vec![(date(4), Day::Pages(3)), (date(5), Day::Pages(1))])
            .with_faults(date(4), 2, vec![Fault::MalformedTable]),
    );
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(6)), source.clone(), store.clone());

    let err = service.run().await.unwrap_err();

    assert!(matches!(err, FloorsheetError::MalformedTable(_)));
    // 致命错误不重试
    assert_eq!(source.page_calls(), vec![(date(4), 1), (date(4), 2)]);
    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!(latest.status, DateStatus::Failed);
    assert_eq!(latest.pages_completed, 1);
    assert!(store.latest_progress(date(5), "").unwrap().is_none());
}

#[tokio::test]
async fn unparsable_page_count_is_fatal() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::BadPager("Total pages: abc"))]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    let err = service.run().await.unwrap_err();

    assert!(matches!(err, FloorsheetError::PageCountUnparsable(_)));
    assert_eq!(source.page_calls().len(), 1);
    assert_eq!(store.count_trades(date(4)).unwrap(), 0);
}

#[tokio::test]
async fn store_failure_is_retried_at_page_level() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]));
    let sink = Arc::new(FlakySink::new(1));
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), sink.clone());

    let summary = service.run().await.unwrap();

    // 第 1 页写库失败后重新抓取
    assert_eq!(source.page_calls(), vec![(date(4), 1), (date(4), 1), (date(4), 2)]);
    assert_eq!(summary.retries, 1);
    assert_eq!(sink.inner.count_trades(date(4)).unwrap(), 6);
    assert_eq!(source.stale_submissions(), 0);
}

#[tokio::test]
async fn discarding_the_probe_refetches_page_one() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]));
    let store = store();
    let cfg = config(date(4), date(5)).with_reuse_probe_page(false);
    let mut service = CrawlService::new(cfg, source.clone(), store.clone());

    let summary = service.run().await.unwrap();

    assert_eq!(source.page_calls(), vec![(date(4), 1), (date(4), 1), (date(4), 2)]);
    assert_eq!(summary.records_persisted, 6);
    assert_eq!(store.count_trades(date(4)).unwrap(), 6);
}

#[tokio::test]
async fn refetching_a_date_overwrites_rows() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]));
    let store = store();

    for _ in 0..2 {
        let cfg = config(date(4), date(5)).with_resume(false);
        let mut service = CrawlService::new(cfg, source.clone(), store.clone());
        service.run().await.unwrap();
    }

    assert_eq!(source.page_calls().len(), 4);
    assert_eq!(store.count_trades(date(4)).unwrap(), 6);
    assert_eq!(store.progress_log().unwrap().len(), 2);
}

#[tokio::test]
async fn pager_without_page_count_is_fatal() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::BadPager("Showing all records"))]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    let err = service.run().await.unwrap_err();

    // 分页元素存在但没有页数文字
    assert!(matches!(err, FloorsheetError::PageCountUnparsable(_)));
    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!((latest.status, latest.pages_completed), (DateStatus::Failed, 0));
}

#[tokio::test]
async fn filters_travel_with_every_page_request() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]));
    let store = store();
    let cfg = config(date(4), date(5)).with_filters(FilterSet::new("NABIL", "", ""));
    let mut service = CrawlService::new(cfg, source.clone(), store.clone());

    service.run().await.unwrap();

    let payloads = source.payloads();
    assert_eq!(payloads.len(), 2);
    for payload in &payloads {
        assert_eq!(payload.get("symbol"), Some("NABIL"));
        assert_eq!(payload.get("date"), Some("03/04/2024"));
    }
    assert_eq!(payloads[1].get("page"), Some("2"));

    let entry = store.latest_progress(date(4), "symbol=NABIL;buyer=;seller=").unwrap().unwrap();
    assert_eq!(entry.status, DateStatus::Complete);
}

#[tokio::test]
async fn failed_bootstrap_is_fatal() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Pages(2))]).failing_initial());
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    let err = service.run().await.unwrap_err();

    assert!(matches!(err, FloorsheetError::SessionBootstrap(_)));
    assert_eq!(source.calls().len(), 1);
    assert!(source.page_calls().is_empty());
}

#[tokio::test]
async fn zero_page_date_is_skipped_with_or_without_probe_reuse() {
    for reuse in [true, false] {
        let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::ZeroPages), (date(5), Day::Pages(1))]));
        let store = store();
        let cfg = config(date(4), date(6)).with_reuse_probe_page(reuse);
        let mut service = CrawlService::new(cfg, source.clone(), store.clone());

        let summary = service.run().await.unwrap();

        assert_eq!((summary.dates_skipped, summary.dates_completed), (1, 1), "reuse={}", reuse);
        let skipped = store.latest_progress(date(4), "").unwrap().unwrap();
        assert_eq!(skipped.status, DateStatus::Skipped);
        assert_eq!(store.count_trades(date(4)).unwrap(), 0);
        assert_eq!(source.page_calls().iter().filter(|(d, _)| *d == date(4)).count(), 1);
    }
}

#[tokio::test]
async fn page_without_pager_is_crawled_as_one_page() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Unpaged)]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    service.run().await.unwrap();

    assert_eq!(source.page_calls(), vec![(date(4), 1)]);
    assert_eq!(store.count_trades(date(4)).unwrap(), ROWS_PER_PAGE as usize);
    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!(latest.status, DateStatus::Complete);
    assert_eq!((latest.pages_completed, latest.pages_total), (1, 1));
}

#[tokio::test]
async fn later_page_count_replaces_the_probe_count() {
    let source = Arc::new(ScriptedSource::new(vec![(date(4), Day::Drifting { first: 2, then: 4 })]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(5)), source.clone(), store.clone());

    service.run().await.unwrap();

    let pages: Vec<u32> = source.page_calls().into_iter().map(|(_, p)| p).collect();
    assert_eq!(pages, vec![1, 2, 3, 4]);
    assert_eq!(store.count_trades(date(4)).unwrap(), (4 * ROWS_PER_PAGE) as usize);
    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!((latest.pages_completed, latest.pages_total), (4, 4));
}

#[tokio::test]
async fn no_data_while_paging_completes_with_pages_seen() {
    let source = Arc::new(ScriptedSource::new(vec![
        (date(4), Day::Truncated { reported: 4, available: 2 }),
        (date(5), Day::Pages(1)),
    ]));
    let store = store();
    let mut service = CrawlService::new(config(date(4), date(6)), source.clone(), store.clone());

    let summary = service.run().await.unwrap();

    assert_eq!(
        source.page_calls(),
        vec![(date(4), 1), (date(4), 2), (date(4), 3), (date(5), 1)]
    );
    assert_eq!(summary.dates_completed, 2);
    assert_eq!(store.count_trades(date(4)).unwrap(), (2 * ROWS_PER_PAGE) as usize);
    let latest = store.latest_progress(date(4), "").unwrap().unwrap();
    assert_eq!(latest.status, DateStatus::Complete);
    assert_eq!((latest.pages_completed, latest.pages_total), (2, 2));
}
