//! BigQuery backend using the `jobs.query` REST endpoint.

use chrono::NaiveDate;
use reqwest::blocking::{Client, Response};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{AnalyticsSource, QueryError, TableId};
use crate::models::DailyCountRow;


const DEFAULT_ENDPOINT: &str = "https://bigquery.googleapis.com";

/// How long one request may block server-side waiting for the job.
const WAIT_MS: u64 = 60_000;


/// Daily transaction counts from a BigQuery table with a `block_timestamp` column.
#[derive(Debug, Clone)]
pub struct BigQuerySource {
    client: Client,
    endpoint: Url,
    billing_project: String,
    access_token: String,
    table: TableId,
}


#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<Value>,
    timeout_ms: u64,
}


#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}


#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}


#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}


#[derive(Debug, Deserialize)]
struct TableCell {
    v: Value,
}


#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    message: String,
}


impl BigQuerySource {
    pub fn new(
        table: TableId,
        billing_project: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, QueryError> {
        Self::with_endpoint(DEFAULT_ENDPOINT, table, billing_project, access_token)
    }

    /// Send requests to a different API root, e.g. a recording proxy.
    pub fn with_endpoint(
        endpoint: &str,
        table: TableId,
        billing_project: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Result<Self, QueryError> {
        let endpoint = Url::parse(endpoint).map_err(|e| QueryError::Endpoint {
            endpoint: endpoint.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client: Client::builder().build()?,
            endpoint,
            billing_project: billing_project.into(),
            access_token: access_token.into(),
            table,
        })
    }

    /// Standard SQL for the per-day aggregate. Dates are bound as parameters.
    pub fn daily_count_sql(&self) -> String {
        format!(
            "SELECT\n  DATE(block_timestamp) AS day,\n  COUNT(*) AS tx_count\n\
             FROM `{}`\n\
             WHERE DATE(block_timestamp) BETWEEN @start_date AND @end_date\n\
             GROUP BY day\n\
             ORDER BY day",
            self.table
        )
    }

    fn url(&self, segments: &[&str]) -> Result<Url, QueryError> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| QueryError::Endpoint {
                endpoint: self.endpoint.to_string(),
                reason: "cannot be a base URL".to_string(),
            })?
            .pop_if_empty()
            .extend(["bigquery", "v2", "projects", self.billing_project.as_str()])
            .extend(segments);
        Ok(url)
    }

    fn start_query(&self, start: NaiveDate, end: NaiveDate) -> Result<QueryResponse, QueryError> {
        let sql = self.daily_count_sql();
        let request = QueryRequest {
            query: &sql,
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: vec![date_param("start_date", start), date_param("end_date", end)],
            timeout_ms: WAIT_MS,
        };

        let url = self.url(&["queries"])?;
        debug!(%url, %start, %end, "submitting query");

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()?;
        decode_response(response)
    }

    fn query_results(
        &self,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, QueryError> {
        let mut url = self.url(&["queries", job.job_id.as_str()])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("timeoutMs", &WAIT_MS.to_string());
            if let Some(location) = &job.location {
                pairs.append_pair("location", location);
            }
            if let Some(token) = page_token {
                pairs.append_pair("pageToken", token);
            }
        }
        debug!(%url, "fetching query results");

        let response = self
            .client
            .get(url)
            .bearer_auth(&self.access_token)
            .send()?;
        decode_response(response)
    }
}


impl AnalyticsSource for BigQuerySource {
    fn query(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyCountRow>, QueryError> {
        let mut response = self.start_query(start, end)?;

        // Wait for completion; the caller owns any overall deadline.
        while !response.job_complete {
            let job = response
                .job_reference
                .take()
                .ok_or_else(|| QueryError::Job("incomplete job without a job reference".into()))?;
            response = self.query_results(&job, None)?;
            if response.job_reference.is_none() {
                response.job_reference = Some(job);
            }
        }

        let mut rows: Vec<DailyCountRow> = Vec::new();
        loop {
            let offset = rows.len();
            for (i, row) in response.rows.iter().enumerate() {
                rows.push(parse_row(row, offset + i)?);
            }

            let Some(token) = response.page_token.take() else {
                break;
            };
            let job = response
                .job_reference
                .take()
                .ok_or_else(|| QueryError::Job("paged result without a job reference".into()))?;
            response = self.query_results(&job, Some(&token))?;
            if response.job_reference.is_none() {
                response.job_reference = Some(job);
            }
        }

        Ok(rows)
    }
}


fn date_param(name: &str, day: NaiveDate) -> Value {
    json!({
        "name": name,
        "parameterType": { "type": "DATE" },
        "parameterValue": { "value": day.format("%Y-%m-%d").to_string() },
    })
}


fn decode_response(response: Response) -> Result<QueryResponse, QueryError> {
    let status = response.status();
    let body = response.text()?;
    if !status.is_success() {
        return Err(QueryError::Status {
            status: status.as_u16(),
            body,
        });
    }

    let parsed: QueryResponse = serde_json::from_str(&body)?;
    // Fatal job errors arrive as a non-2xx status; these are advisory.
    for error in &parsed.errors {
        warn!(message = %error.message, "query job reported a warning");
    }
    Ok(parsed)
}


/// Decode one `{"f":[{"v":day},{"v":count}]}` row. INT64 arrives as a string.
fn parse_row(row: &TableRow, index: usize) -> Result<DailyCountRow, QueryError> {
    let invalid = |reason: String| QueryError::InvalidRow { index, reason };

    let [day_cell, count_cell] = row.f.as_slice() else {
        return Err(invalid(format!("expected 2 cells, got {}", row.f.len())));
    };

    let day = day_cell
        .v
        .as_str()
        .ok_or_else(|| invalid(format!("day is not a string: {}", day_cell.v)))?;
    let day = NaiveDate::parse_from_str(day, "%Y-%m-%d")
        .map_err(|e| invalid(format!("bad day {day:?}: {e}")))?;

    let tx_count = match &count_cell.v {
        Value::String(s) => s.parse::<u64>().ok(),
        Value::Number(n) => n.as_u64(),
        _ => None,
    }
    .ok_or_else(|| invalid(format!("bad tx_count: {}", count_cell.v)))?;

    Ok(DailyCountRow::new(day, tx_count))
}
