use std::sync::Arc;

use futures::future::BoxFuture;
use reqwest::{
    Client, Method, RequestBuilder,
    header::{AUTHORIZATION, HeaderMap, HeaderValue},
};
use serde_json::Value;

use crate::dao::{
    models::{Filter, Table},
    room_store::{RoomStore, Subscription, SubscriptionId},
    storage::{StorageError, StorageResult},
};

use super::{
    config::PostgrestConfig,
    error::{PostgrestError, PostgrestResult},
    realtime::RealtimeClient,
};

const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

/// [`RoomStore`] over PostgREST with a realtime websocket for change feeds.
#[derive(Clone)]
pub struct PostgrestStore {
    client: Client,
    base_url: Arc<str>,
    realtime: RealtimeClient,
}

impl PostgrestStore {
    /// Build the HTTP client and check the endpoint answers.
    pub async fn connect(config: PostgrestConfig) -> PostgrestResult<Self> {
        let mut headers = HeaderMap::new();
        let key = HeaderValue::from_str(&config.api_key)
            .map_err(|_| PostgrestError::InvalidApiKey)?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", config.api_key))
            .map_err(|_| PostgrestError::InvalidApiKey)?;
        let profile = HeaderValue::from_str(&config.schema)
            .map_err(|_| PostgrestError::InvalidSchema {
                schema: config.schema.clone(),
            })?;
        headers.insert("apikey", key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("Accept-Profile", profile.clone());
        headers.insert("Content-Profile", profile);

        let client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|source| PostgrestError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::<str>::from(config.base_url.trim_end_matches('/')),
            realtime: RealtimeClient::new(&config),
        };

        store.ping().await?;
        Ok(store)
    }

    fn request(&self, method: Method, table: Table) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, table.name());
        self.client.request(method, url)
    }

    async fn ping(&self) -> PostgrestResult<()> {
        let path = format!("{}/", self.base_url);
        let response = self
            .client
            .get(&path)
            .send()
            .await
            .map_err(|source| PostgrestError::RequestSend { path, source })?;

        if response.status().is_success() {
            Ok(())
        } else {
            Err(PostgrestError::RequestStatus {
                resource: "health",
                status: response.status(),
                body: response.text().await.unwrap_or_default(),
            })
        }
    }

    /// Send `builder` and decode the JSON array PostgREST answers with.
    async fn send_rows(&self, table: Table, builder: RequestBuilder) -> PostgrestResult<Vec<Value>> {
        let response = builder
            .send()
            .await
            .map_err(|source| PostgrestError::RequestSend {
                path: table.name().to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(PostgrestError::RequestStatus {
                resource: table.name(),
                status,
                body: response.text().await.unwrap_or_default(),
            });
        }

        response
            .json::<Vec<Value>>()
            .await
            .map_err(|source| PostgrestError::DecodeResponse {
                path: table.name().to_string(),
                source,
            })
    }
}

/// Translate equality clauses into PostgREST `column=eq.value` query pairs.
fn filter_query(filter: &Filter) -> Vec<(String, String)> {
    filter
        .clauses()
        .iter()
        .map(|(column, value)| (column.clone(), format!("eq.{}", query_value(value))))
        .collect()
}

pub(super) fn query_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

impl RoomStore for PostgrestStore {
    fn select(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::GET, table)
                .query(&[("select", "*")])
                .query(&filter_query(&filter));
            Ok(store.send_rows(table, builder).await?)
        })
    }

    fn insert(
        &self,
        table: Table,
        rows: Vec<Value>,
    ) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::POST, table)
                .header("Prefer", RETURN_REPRESENTATION)
                .json(&rows);
            Ok(store.send_rows(table, builder).await?)
        })
    }

    fn update(
        &self,
        table: Table,
        filter: Filter,
        patch: Value,
    ) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::PATCH, table)
                .query(&filter_query(&filter))
                .header("Prefer", RETURN_REPRESENTATION)
                .json(&patch);
            Ok(store.send_rows(table, builder).await?)
        })
    }

    fn upsert(
        &self,
        table: Table,
        row: Value,
        conflict_key: &'static str,
    ) -> BoxFuture<'static, StorageResult<Value>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::POST, table)
                .query(&[("on_conflict", conflict_key)])
                .header("Prefer", MERGE_DUPLICATES)
                .json(&[row]);
            let mut rows = store.send_rows(table, builder).await?;
            if rows.is_empty() {
                return Err(StorageError::rejected(table, "upsert returned no row"));
            }
            Ok(rows.swap_remove(0))
        })
    }

    fn delete(&self, table: Table, filter: Filter) -> BoxFuture<'static, StorageResult<Vec<Value>>> {
        let store = self.clone();
        Box::pin(async move {
            let builder = store
                .request(Method::DELETE, table)
                .query(&filter_query(&filter))
                .header("Prefer", RETURN_REPRESENTATION);
            Ok(store.send_rows(table, builder).await?)
        })
    }

    fn subscribe(
        &self,
        table: Table,
        filter: Filter,
    ) -> BoxFuture<'static, StorageResult<Subscription>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.realtime.subscribe(table, filter).await?) })
    }

    fn unsubscribe(&self, id: SubscriptionId) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.realtime.unsubscribe(id);
            Ok(())
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { Ok(store.ping().await?) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_become_eq_operators() {
        let filter = Filter::eq("room_id", "abc123").and_eq("id", 42);
        assert_eq!(
            filter_query(&filter),
            vec![
                ("room_id".to_string(), "eq.abc123".to_string()),
                ("id".to_string(), "eq.42".to_string()),
            ]
        );
    }

    #[test]
    fn string_values_are_not_quoted() {
        assert_eq!(query_value(&json!("x y")), "x y");
        assert_eq!(query_value(&json!(true)), "true");
    }
}
