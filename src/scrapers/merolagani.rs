use crate::config::{ClientConfig, Transport};
use crate::errors::{FloorsheetError, Result};
use crate::models::crawl::CrawlCursor;
use crate::models::trade::FilterSet;
use crate::scrapers::base::FloorsheetSource;
use crate::scrapers::token_store::FormFields;
use crate::util::format_form_date;
use async_trait::async_trait;
use log::debug;
use rand::seq::SliceRandom;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;

const EVENT_TARGET: &str = "__EVENTTARGET";
const SEARCH_BUTTON: &str = "ctl00$ContentPlaceHolder1$lbtnSearchFloorsheet";
const PAGE_FIELD: &str = "ctl00$ContentPlaceHolder1$PagerControl1$hdnCurrentPage";
const DATE_FIELD: &str = "ctl00$ContentPlaceHolder1$txtFloorsheetDateFilter";
const SYMBOL_FIELD: &str = "ctl00$ContentPlaceHolder1$ASCompanyFilter$txtAutoSuggest";
const BUYER_FIELD: &str = "ctl00$ContentPlaceHolder1$txtBuyerBrokerCodeFilter";
const SELLER_FIELD: &str = "ctl00$ContentPlaceHolder1$txtSellerBrokerCodeFilter";

/// Every field the Floorsheet.aspx form posts back, with its resting value.
const FORM_FIELDS: [(&str, &str); 20] = [
    (EVENT_TARGET, ""),
    ("__EVENTARGUMENT", ""),
    ("__VIEWSTATE", ""),
    ("__EVENTVALIDATION", ""),
    ("__VIEWSTATEGENERATOR", "1F15F17F"),
    ("ctl00$ASCompany$hdnAutoSuggest", "0"),
    ("ctl00$ASCompany$txtAutoSuggest", ""),
    ("ctl00$txtNews", ""),
    ("ctl00$AutoSuggest1$hdnAutoSuggest", "0"),
    ("ctl00$AutoSuggest1$txtAutoSuggest", ""),
    ("ctl00$ContentPlaceHolder1$ASCompanyFilter$hdnAutoSuggest", "0"),
    (SYMBOL_FIELD, ""),
    (BUYER_FIELD, ""),
    (SELLER_FIELD, ""),
    (DATE_FIELD, ""),
    ("ctl00$ContentPlaceHolder1$PagerControl1$hdnPCID", "PC1"),
    (PAGE_FIELD, "1"),
    ("ctl00$ContentPlaceHolder1$PagerControl1$btnPaging", ""),
    ("ctl00$ContentPlaceHolder1$PagerControl2$hdnPCID", "PC2"),
    ("ctl00$ContentPlaceHolder1$PagerControl2$hdnCurrentPage", "0"),
];

#[derive(Debug, Deserialize)]
struct SolverReply {
    status: String,
    #[serde(default)]
    message: String,
    solution: Option<SolverSolution>,
}

#[derive(Debug, Deserialize)]
struct SolverSolution {
    status: u16,
    response: String,
}

/// merolagani.com floorsheet source.
pub struct MeroLaganiScraper {
    client: Client,
    config: ClientConfig,
}

impl MeroLaganiScraper {
    pub fn new(config: ClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .cookie_store(true)
            .build()?;

        Ok(Self { client, config })
    }

    fn user_agent(&self) -> &str {
        self.config
            .user_agents
            .choose(&mut rand::thread_rng())
            .map(String::as_str)
            .unwrap_or("Mozilla/5.0")
    }

    async fn direct_get(&self) -> Result<String> {
        let response = self
            .client
            .get(&self.config.base_url)
            .header("User-Agent", self.user_agent())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FloorsheetError::Transport(format!("GET {} returned {}", self.config.base_url, status)));
        }
        Ok(response.text().await?)
    }

    async fn direct_post(&self, payload: &FormFields) -> Result<String> {
        let response = self
            .client
            .post(&self.config.base_url)
            .header("User-Agent", self.user_agent())
            .header("Referer", &self.config.base_url)
            .form(payload.as_pairs())
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FloorsheetError::Transport(format!("POST {} returned {}", self.config.base_url, status)));
        }
        Ok(response.text().await?)
    }

    /// One exchange through the solving proxy.
    async fn solve(&self, endpoint: &str, max_timeout_ms: u64, post_data: Option<String>) -> Result<String> {
        let cmd = if post_data.is_some() { "request.post" } else { "request.get" };
        let mut body = json!({
            "cmd": cmd,
            "url": self.config.base_url,
            "maxTimeout": max_timeout_ms,
        });
        if let Some(data) = post_data {
            body["postData"] = json!(data);
        }

        let response = self
            .client
            .post(endpoint)
            .header("User-Agent", self.user_agent())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FloorsheetError::Transport(format!("solver {} returned {}", endpoint, status)));
        }

        let text = response.text().await?;
        let reply: SolverReply = serde_json::from_str(&text)
            .map_err(|e| FloorsheetError::Transport(format!("unreadable solver reply: {}", e)))?;

        if reply.status != "ok" {
            return Err(FloorsheetError::Transport(format!("solver status '{}': {}", reply.status, reply.message)));
        }
        let solution = reply
            .solution
            .ok_or_else(|| FloorsheetError::Transport("solver reply has no solution".to_string()))?;
        if !(200..300).contains(&solution.status) {
            return Err(FloorsheetError::Transport(format!("source returned {} via solver", solution.status)));
        }
        Ok(solution.response)
    }
}

#[async_trait]
impl FloorsheetSource for MeroLaganiScraper {
    fn source_name(&self) -> &'static str {
        "merolagani"
    }

    fn base_form_fields(&self) -> FormFields {
        FORM_FIELDS.into_iter().collect()
    }

    fn form_overrides(&self, cursor: &CrawlCursor, filters: &FilterSet) -> Vec<(&'static str, String)> {
        let mut overrides = vec![
            (PAGE_FIELD, cursor.page_index.to_string()),
            (DATE_FIELD, format_form_date(cursor.target_date)),
            // 有日期过滤时需要触发搜索按钮
            (EVENT_TARGET, SEARCH_BUTTON.to_string()),
        ];
        if !filters.symbol.is_empty() {
            overrides.push((SYMBOL_FIELD, filters.symbol.clone()));
        }
        if !filters.buyer.is_empty() {
            overrides.push((BUYER_FIELD, filters.buyer.clone()));
        }
        if !filters.seller.is_empty() {
            overrides.push((SELLER_FIELD, filters.seller.clone()));
        }
        overrides
    }

    async fn fetch_initial(&self) -> Result<String> {
        debug!("Establishing session with {}", self.config.base_url);
        let result = match &self.config.transport {
            Transport::Direct => self.direct_get().await,
            Transport::Solver { endpoint, max_timeout_ms } => self.solve(endpoint, *max_timeout_ms, None).await,
        };
        result.map_err(|e| FloorsheetError::SessionBootstrap(e.to_string()))
    }

    async fn fetch_page(&self, cursor: &CrawlCursor, payload: &FormFields) -> Result<String> {
        debug!("Requesting {}", cursor);
        match &self.config.transport {
            Transport::Direct => self.direct_post(payload).await,
            Transport::Solver { endpoint, max_timeout_ms } => {
                let encoded = url::form_urlencoded::Serializer::new(String::new())
                    .extend_pairs(payload.as_pairs())
                    .finish();
                self.solve(endpoint, *max_timeout_ms, Some(encoded)).await
            }
        }
    }
}
