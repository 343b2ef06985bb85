use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::config::SupabaseConfig;

/// PostgREST filter for a table request.
///
/// Renders to the query pairs PostgREST expects (`col=eq.value`,
/// `order=col.asc`, `limit=n`). `select=*` is always included.
#[derive(Debug, Clone, Default)]
pub struct Query {
    filters: Vec<(String, String)>,
    order: Option<String>,
    limit: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.to_string(), format!("eq.{value}")));
        self
    }

    pub fn in_list(mut self, column: &str, values: &[&str]) -> Self {
        self.filters
            .push((column.to_string(), format!("in.({})", values.join(","))));
        self
    }

    pub fn lte(mut self, column: &str, value: impl std::fmt::Display) -> Self {
        self.filters.push((column.to_string(), format!("lte.{value}")));
        self
    }

    /// `or=(a,b)` group, e.g. `("scheduled_at.is.null", "scheduled_at.lte.<ts>")`.
    pub fn or(mut self, conditions: &[String]) -> Self {
        self.filters
            .push(("or".to_string(), format!("({})", conditions.join(","))));
        self
    }

    pub fn order(mut self, column: &str, ascending: bool) -> Self {
        let dir = if ascending { "asc" } else { "desc" };
        self.order = Some(format!("{column}.{dir}"));
        self
    }

    pub fn limit(mut self, n: usize) -> Self {
        self.limit = Some(n);
        self
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![("select".to_string(), "*".to_string())];
        pairs.extend(self.filters.iter().cloned());
        if let Some(ref order) = self.order {
            pairs.push(("order".to_string(), order.clone()));
        }
        if let Some(limit) = self.limit {
            pairs.push(("limit".to_string(), limit.to_string()));
        }
        pairs
    }
}

/// Thin client over Supabase's PostgREST endpoint (`/rest/v1/<table>`).
pub struct SupabaseClient {
    client: reqwest::Client,
    rest_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(config: &SupabaseConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            rest_url: format!("{}/rest/v1", config.url.trim_end_matches('/')),
            service_key: config.service_key.clone(),
        }
    }

    fn request(&self, method: reqwest::Method, table: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}/{table}", self.rest_url))
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    pub async fn select<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
    ) -> Result<Vec<T>, StoreError> {
        let resp = self
            .request(reqwest::Method::GET, table)
            .query(&query.to_pairs())
            .send()
            .await?;
        Self::rows(resp).await
    }

    pub async fn insert<T: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        row: &T,
    ) -> Result<Vec<R>, StoreError> {
        let resp = self
            .request(reqwest::Method::POST, table)
            .header("Prefer", "return=representation")
            .json(row)
            .send()
            .await?;
        Self::rows(resp).await
    }

    pub async fn update<P: Serialize, R: DeserializeOwned>(
        &self,
        table: &str,
        query: &Query,
        patch: &P,
    ) -> Result<Vec<R>, StoreError> {
        let resp = self
            .request(reqwest::Method::PATCH, table)
            .header("Prefer", "return=representation")
            .query(&query.to_pairs())
            .json(patch)
            .send()
            .await?;
        Self::rows(resp).await
    }

    async fn rows<R: DeserializeOwned>(resp: reqwest::Response) -> Result<Vec<R>, StoreError> {
        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(StoreError::Api(status, body));
        }
        resp.json()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("database returned {0}: {1}")]
    Api(u16, String),
    #[error("unexpected database response: {0}")]
    Decode(String),
    #[error("{0} not found")]
    NotFound(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use httpmock::Method::PATCH;
    use serde_json::json;

    fn client(server: &MockServer) -> SupabaseClient {
        SupabaseClient::new(&SupabaseConfig {
            url: server.base_url(),
            service_key: "service".to_string(),
        })
    }

    #[test]
    fn query_renders_postgrest_pairs() {
        let pairs = Query::new()
            .in_list("status", &["pending", "retrying"])
            .eq("campaign_id", "c1")
            .lte("attempts", 1)
            .order("created_at", true)
            .limit(10)
            .to_pairs();
        let expected: Vec<(String, String)> = [
            ("select", "*"),
            ("status", "in.(pending,retrying)"),
            ("campaign_id", "eq.c1"),
            ("attempts", "lte.1"),
            ("order", "created_at.asc"),
            ("limit", "10"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        assert_eq!(pairs, expected);
    }

    #[tokio::test]
    async fn select_sends_keys_and_filters() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(GET)
                    .path("/rest/v1/business_profiles")
                    .query_param("phone_number", "eq.+15550001111")
                    .header("apikey", "service")
                    .header("authorization", "Bearer service");
                then.status(200).json_body(json!([{ "id": "b1" }]));
            })
            .await;

        let rows: Vec<serde_json::Value> = client(&server)
            .select(
                "business_profiles",
                &Query::new().eq("phone_number", "+15550001111"),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows, vec![json!({ "id": "b1" })]);
    }

    #[tokio::test]
    async fn insert_asks_for_representation() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST)
                    .path("/rest/v1/call_logs")
                    .header("prefer", "return=representation")
                    .json_body(json!({ "call_sid": "CA1" }));
                then.status(201).json_body(json!([{ "call_sid": "CA1" }]));
            })
            .await;

        let rows: Vec<serde_json::Value> = client(&server)
            .insert("call_logs", &json!({ "call_sid": "CA1" }))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn api_errors_carry_status_and_body() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(PATCH).path("/rest/v1/outreach_jobs");
                then.status(400).body("bad filter");
            })
            .await;

        let err = client(&server)
            .update::<_, serde_json::Value>(
                "outreach_jobs",
                &Query::new().eq("id", "j1"),
                &json!({ "status": "failed" }),
            )
            .await
            .unwrap_err();

        match err {
            StoreError::Api(status, body) => {
                assert_eq!(status, 400);
                assert_eq!(body, "bad filter");
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
