#![doc = include_str!("../README.md")]
#![doc(issue_tracker_base_url = "https://github.com/factordynamics/screener/issues/")]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

//! Tushare Pro data provider.
//!
//! This crate implements the screener-core provider traits for the
//! [Tushare Pro](https://tushare.pro/) HTTP API.
//!
//! # Usage
//!
//! ```rust,ignore
//! use screener_tushare::TushareProvider;
//! use screener_core::{Dataset, EntityId, RecordSource};
//! use chrono::NaiveDate;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let provider = TushareProvider::from_env()?;
//!
//!     let entity = EntityId::new("600519.SH");
//!     let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
//!     let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
//!
//!     let income = provider
//!         .fetch_dataset(Dataset::Income, &entity, Some((start, end)))
//!         .await?;
//!
//!     Ok(())
//! }
//! ```

use async_trait::async_trait;
use chrono::NaiveDate;
use polars::prelude::*;
use reqwest::Client;
use screener_core::{
    DataProvider, Dataset, EntityId, RecordSource, Result, ScreenError, UniverseSource,
};
use serde::Deserialize;
use serde_json::{Map, Value, json};
use std::fmt;

/// Base URL for the Tushare Pro API.
const TUSHARE_BASE_URL: &str = "http://api.tushare.pro";

/// Environment variable holding the API token.
pub const TOKEN_ENV: &str = "TUSHARE_TOKEN";

const PROVIDER_NAME: &str = "Tushare";

/// Row limit requested for statement endpoints.
const STATEMENT_LIMIT: usize = 200;

/// Error code returned when the per-minute ceiling is exceeded.
const CODE_RATE_LIMITED: i64 = 40203;
/// Error codes returned for missing or invalid tokens and insufficient points.
const CODES_AUTH: [i64; 2] = [40001, 40101];

/// API name and field list for one dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Endpoint {
    api_name: &'static str,
    fields: &'static str,
}

const fn endpoint(dataset: Dataset) -> Endpoint {
    match dataset {
        Dataset::Profile => Endpoint {
            api_name: "stock_company",
            fields: "ts_code,com_name,chairman,manager,secretary,reg_capital,setup_date,\
                     province,city,website,email,employees,main_business",
        },
        Dataset::AuditOpinion => Endpoint {
            api_name: "fina_audit",
            fields: "ts_code,ann_date,end_date,audit_result,audit_agency,audit_sign",
        },
        Dataset::BalanceSheet => Endpoint {
            api_name: "balancesheet",
            fields: "ts_code,ann_date,end_date,total_assets,total_liab",
        },
        Dataset::Income => Endpoint {
            api_name: "income",
            fields: "ts_code,ann_date,end_date,revenue,oper_cost,n_income",
        },
        Dataset::CashFlow => Endpoint {
            api_name: "cashflow",
            fields: "ts_code,ann_date,end_date,n_cashflow_act",
        },
    }
}

/// Tushare Pro data provider.
///
/// Provides access to:
/// - Company profiles
/// - Audit opinions
/// - Balance sheets, income statements, cash flow statements
/// - The listed-stock universe
#[derive(Clone)]
pub struct TushareProvider {
    client: Client,
    token: String,
    base_url: String,
}

impl fmt::Debug for TushareProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TushareProvider")
            .field("token", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl TushareProvider {
    /// Create a new provider with the given API token.
    #[must_use]
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_client(Client::new(), token)
    }

    /// Create a new provider with a custom HTTP client.
    #[must_use]
    pub fn with_client(client: Client, token: impl Into<String>) -> Self {
        Self {
            client,
            token: token.into(),
            base_url: TUSHARE_BASE_URL.to_string(),
        }
    }

    /// Create a provider from the `TUSHARE_TOKEN` environment variable.
    ///
    /// # Errors
    /// Returns [`ScreenError::InvalidParameter`] if the variable is unset or empty.
    pub fn from_env() -> Result<Self> {
        match std::env::var(TOKEN_ENV) {
            Ok(token) if !token.trim().is_empty() => Ok(Self::new(token.trim())),
            _ => Err(ScreenError::InvalidParameter(format!("{TOKEN_ENV} is not set"))),
        }
    }

    /// Point the provider at a different endpoint (e.g. a proxy).
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Build the JSON request body.
    fn body(&self, api_name: &str, params: Map<String, Value>, fields: &str) -> Value {
        json!({
            "api_name": api_name,
            "token": self.token,
            "params": params,
            "fields": fields,
        })
    }

    /// POST a query and decode the tabular payload.
    async fn query(
        &self,
        api_name: &str,
        params: Map<String, Value>,
        fields: &str,
    ) -> Result<TushareData> {
        tracing::debug!(api_name, "Tushare request");

        let response = self
            .client
            .post(&self.base_url)
            .json(&self.body(api_name, params, fields))
            .send()
            .await
            .map_err(|e| ScreenError::Network(e.to_string()))?;

        if response.status() == reqwest::StatusCode::TOO_MANY_REQUESTS {
            return Err(ScreenError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after: None,
            });
        }

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(ScreenError::Network(format!("HTTP {status}: {text}")));
        }

        let text = response
            .text()
            .await
            .map_err(|e| ScreenError::Network(e.to_string()))?;
        let parsed: TushareResponse =
            serde_json::from_str(&text).map_err(|e| ScreenError::Parse(format!("{e}: {text}")))?;
        parsed.into_data()
    }
}

fn window_params(
    entity: &EntityId,
    window: Option<(NaiveDate, NaiveDate)>,
    limit: Option<usize>,
) -> Map<String, Value> {
    let mut params = Map::new();
    params.insert("ts_code".to_string(), Value::from(entity.as_str()));
    if let Some((start, end)) = window {
        params.insert(
            "start_date".to_string(),
            Value::from(start.format("%Y%m%d").to_string()),
        );
        params.insert(
            "end_date".to_string(),
            Value::from(end.format("%Y%m%d").to_string()),
        );
    }
    if let Some(limit) = limit {
        params.insert("limit".to_string(), Value::from(limit));
    }
    params
}

impl DataProvider for TushareProvider {
    fn name(&self) -> &str {
        "Tushare Pro"
    }

    fn description(&self) -> &str {
        "Tushare Pro API for China A-share company profiles, audit opinions and financial statements"
    }
}

#[async_trait]
impl RecordSource for TushareProvider {
    async fn fetch_dataset(
        &self,
        dataset: Dataset,
        entity: &EntityId,
        window: Option<(NaiveDate, NaiveDate)>,
    ) -> Result<DataFrame> {
        let Endpoint { api_name, fields } = endpoint(dataset);
        let params = match dataset {
            Dataset::Profile => window_params(entity, None, None),
            _ => window_params(entity, window, Some(STATEMENT_LIMIT)),
        };
        let data = self.query(api_name, params, fields).await?;
        tracing::debug!(%entity, %dataset, rows = data.items.len(), "Tushare response");
        data.into_frame()
    }
}

#[async_trait]
impl UniverseSource for TushareProvider {
    async fn universe(&self, exclude_special_treatment: bool) -> Result<Vec<EntityId>> {
        let mut params = Map::new();
        params.insert("exchange".to_string(), Value::from(""));
        params.insert("list_status".to_string(), Value::from("L"));
        let data = self
            .query(
                "stock_basic",
                params,
                "ts_code,symbol,name,area,industry,list_date",
            )
            .await?;
        let entities = data.listed_entities(exclude_special_treatment)?;
        tracing::debug!(count = entities.len(), "Fetched listed universe");
        Ok(entities)
    }
}

/// Tushare response envelope.
#[derive(Debug, Clone, Deserialize)]
struct TushareResponse {
    code: i64,
    #[serde(default)]
    msg: Option<String>,
    #[serde(default)]
    data: Option<TushareData>,
}

impl TushareResponse {
    fn into_data(self) -> Result<TushareData> {
        let message = self.msg.unwrap_or_default();
        match self.code {
            0 => Ok(self.data.unwrap_or_default()),
            CODE_RATE_LIMITED => Err(ScreenError::RateLimited {
                provider: PROVIDER_NAME.to_string(),
                retry_after: None,
            }),
            code if CODES_AUTH.contains(&code) => Err(ScreenError::AuthenticationFailed(format!(
                "{PROVIDER_NAME}: {message}"
            ))),
            code => Err(ScreenError::Api {
                provider: PROVIDER_NAME.to_string(),
                code,
                message,
            }),
        }
    }
}

/// Column names plus row-major values.
#[derive(Debug, Clone, Default, Deserialize)]
struct TushareData {
    #[serde(default)]
    fields: Vec<String>,
    #[serde(default)]
    items: Vec<Vec<Value>>,
}

impl TushareData {
    /// Converts rows into a DataFrame: all-numeric columns become `f64`, others strings.
    fn into_frame(self) -> Result<DataFrame> {
        if self.items.is_empty() {
            return Ok(DataFrame::empty());
        }

        let mut columns = Vec::with_capacity(self.fields.len());
        for (index, name) in self.fields.iter().enumerate() {
            let cells: Vec<&Value> = self
                .items
                .iter()
                .map(|row| row.get(index).unwrap_or(&Value::Null))
                .collect();

            let numeric = cells.iter().all(|v| v.is_null() || v.is_number());
            let column = if numeric {
                let values: Vec<Option<f64>> = cells.iter().map(|v| v.as_f64()).collect();
                Column::new(name.as_str().into(), values)
            } else {
                let values: Vec<Option<String>> = cells
                    .iter()
                    .map(|v| match v {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                Column::new(name.as_str().into(), values)
            };
            columns.push(column);
        }

        DataFrame::new(columns).map_err(|e| ScreenError::Parse(e.to_string()))
    }

    fn column_index(&self, name: &str) -> Result<usize> {
        self.fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| ScreenError::Parse(format!("missing column {name}")))
    }

    /// Listed codes sorted ascending, optionally without `ST` names.
    fn listed_entities(&self, exclude_special_treatment: bool) -> Result<Vec<EntityId>> {
        if self.items.is_empty() {
            return Ok(Vec::new());
        }
        let code_idx = self.column_index("ts_code")?;
        let name_idx = self.column_index("name")?;

        let mut entities: Vec<EntityId> = self
            .items
            .iter()
            .filter(|row| {
                let name = row.get(name_idx).and_then(Value::as_str).unwrap_or_default();
                !(exclude_special_treatment && name.contains("ST"))
            })
            .filter_map(|row| row.get(code_idx).and_then(Value::as_str))
            .map(EntityId::new)
            .filter(|id| !id.is_empty())
            .collect();
        entities.sort();
        Ok(entities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(json: &str) -> TushareResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_request_body() {
        let provider = TushareProvider::new("test_token");
        let start = NaiveDate::from_ymd_opt(2018, 1, 1).unwrap();
        let end = NaiveDate::from_ymd_opt(2022, 12, 31).unwrap();
        let params = window_params(&EntityId::new("600519.sh"), Some((start, end)), Some(200));
        let body = provider.body("income", params, "ts_code,end_date");

        assert_eq!(body["api_name"], "income");
        assert_eq!(body["token"], "test_token");
        assert_eq!(body["params"]["ts_code"], "600519.SH");
        assert_eq!(body["params"]["start_date"], "20180101");
        assert_eq!(body["params"]["end_date"], "20221231");
        assert_eq!(body["params"]["limit"], 200);
        assert_eq!(body["fields"], "ts_code,end_date");
    }

    #[test]
    fn test_profile_params_have_no_window() {
        let params = window_params(&EntityId::new("000001.SZ"), None, None);
        assert_eq!(params.len(), 1);
        assert_eq!(endpoint(Dataset::Profile).api_name, "stock_company");
        assert_eq!(endpoint(Dataset::CashFlow).api_name, "cashflow");
    }

    #[test]
    fn test_error_codes() {
        let limited = response(r#"{"code":40203,"msg":"too many calls","data":null}"#);
        assert!(matches!(
            limited.into_data(),
            Err(ScreenError::RateLimited { .. })
        ));

        let auth = response(r#"{"code":40101,"msg":"bad token"}"#);
        assert!(matches!(
            auth.into_data(),
            Err(ScreenError::AuthenticationFailed(_))
        ));

        let other = response(r#"{"code":50000,"msg":"boom"}"#);
        assert!(matches!(
            other.into_data(),
            Err(ScreenError::Api { code: 50000, .. })
        ));
    }

    #[test]
    fn test_frame_from_items() {
        let data = response(
            r#"{"code":0,"msg":"","data":{
                "fields":["ts_code","end_date","revenue"],
                "items":[["600519.SH","20221231",1.5e11],["600519.SH","20211231",null]]
            }}"#,
        )
        .into_data()
        .unwrap();
        let df = data.into_frame().unwrap();

        assert_eq!(df.height(), 2);
        assert_eq!(df.column("revenue").unwrap().dtype(), &DataType::Float64);
        assert_eq!(df.column("end_date").unwrap().dtype(), &DataType::String);
        assert_eq!(df.column("revenue").unwrap().null_count(), 1);
    }

    #[test]
    fn test_empty_items_yield_empty_frame() {
        let data = response(r#"{"code":0,"data":{"fields":["ts_code"],"items":[]}}"#)
            .into_data()
            .unwrap();
        assert_eq!(data.into_frame().unwrap().height(), 0);
    }

    #[test]
    fn test_universe_excludes_special_treatment() {
        let data = response(
            r#"{"code":0,"data":{
                "fields":["ts_code","name"],
                "items":[["600519.SH","Kweichow Moutai"],["000001.SZ","Ping An Bank"],["600289.SH","*ST Xintong"]]
            }}"#,
        )
        .into_data()
        .unwrap();

        let all = data.listed_entities(false).unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].as_str(), "000001.SZ");

        let screened = data.listed_entities(true).unwrap();
        assert_eq!(
            screened,
            vec![EntityId::new("000001.SZ"), EntityId::new("600519.SH")]
        );
    }

    #[test]
    fn test_provider_metadata() {
        let provider = TushareProvider::new("test_token");
        assert_eq!(provider.name(), "Tushare Pro");
        assert!(!provider.description().is_empty());
    }

    #[test]
    fn test_debug_redacts_token() {
        let provider = TushareProvider::new("secret_token_12345");
        let debug_str = format!("{:?}", provider);
        assert!(!debug_str.contains("secret_token_12345"));
        assert!(debug_str.contains("[REDACTED]"));
    }
}
