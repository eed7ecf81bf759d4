//! Change feed over the Phoenix-style realtime websocket exposed next to PostgREST.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::{sync::mpsc, task::JoinHandle, time};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::dao::{
    models::{Filter, Table},
    room_store::{RawChange, Subscription, SubscriptionId},
};

use super::{
    config::PostgrestConfig,
    error::{PostgrestError, PostgrestResult},
    store::query_value,
};

const JOIN_REF: &str = "1";
const JOIN_TIMEOUT: Duration = Duration::from_secs(10);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

#[derive(Clone)]
pub(super) struct RealtimeClient {
    url: Arc<str>,
    api_key: Arc<str>,
    schema: Arc<str>,
    pumps: Arc<DashMap<SubscriptionId, JoinHandle<()>>>,
}

#[derive(Debug, Deserialize)]
struct Frame {
    topic: String,
    event: String,
    #[serde(default)]
    payload: Value,
    #[serde(default, rename = "ref")]
    reference: Option<String>,
}

impl RealtimeClient {
    pub(super) fn new(config: &PostgrestConfig) -> Self {
        Self {
            url: Arc::<str>::from(config.realtime_url.as_str()),
            api_key: Arc::<str>::from(config.api_key.as_str()),
            schema: Arc::<str>::from(config.schema.as_str()),
            pumps: Arc::new(DashMap::new()),
        }
    }

    /// Open a dedicated socket, join a channel for `table` and pump its changes.
    pub(super) async fn subscribe(
        &self,
        table: Table,
        filter: Filter,
    ) -> PostgrestResult<Subscription> {
        let url = format!("{}?apikey={}&vsn=1.0.0", self.url, self.api_key);
        let (socket, _response) = connect_async(url)
            .await
            .map_err(|source| PostgrestError::RealtimeConnect {
                source: Box::new(source),
            })?;
        let (mut sink, mut stream) = socket.split();

        let id = Uuid::new_v4();
        let topic = format!("realtime:{}-{id}", table.name());
        let join = join_frame(&topic, &self.schema, table, &filter);
        sink.send(Message::Text(join.to_string().into()))
            .await
            .map_err(|source| PostgrestError::RealtimeConnect {
                source: Box::new(source),
            })?;

        let acknowledged = time::timeout(JOIN_TIMEOUT, async {
            while let Some(message) = stream.next().await {
                let text = match message {
                    Ok(Message::Text(text)) => text,
                    Ok(_) => continue,
                    Err(err) => return Err(err.to_string()),
                };
                let Ok(frame) = serde_json::from_str::<Frame>(text.as_str()) else {
                    continue;
                };
                if frame.topic == topic
                    && frame.event == "phx_reply"
                    && frame.reference.as_deref() == Some(JOIN_REF)
                {
                    return match frame.payload.get("status").and_then(Value::as_str) {
                        Some("ok") => Ok(()),
                        _ => Err(frame.payload.to_string()),
                    };
                }
            }
            Err("socket closed before join reply".to_string())
        })
        .await;

        match acknowledged {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => return Err(PostgrestError::RealtimeJoin { topic, reason }),
            Err(_) => {
                return Err(PostgrestError::RealtimeJoin {
                    topic,
                    reason: "timed out waiting for join reply".into(),
                });
            }
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let pumps = self.pumps.clone();
        let pump_filter = filter.clone();
        let handle = tokio::spawn(async move {
            let mut heartbeat = time::interval(HEARTBEAT_INTERVAL);
            heartbeat.tick().await;
            let mut next_ref: u64 = 1;

            loop {
                tokio::select! {
                    _ = tx.closed() => break,
                    _ = heartbeat.tick() => {
                        next_ref += 1;
                        let frame = json!({
                            "topic": "phoenix",
                            "event": "heartbeat",
                            "payload": {},
                            "ref": next_ref.to_string(),
                        });
                        if let Err(err) = sink.send(Message::Text(frame.to_string().into())).await {
                            warn!(error = %err, %topic, "realtime heartbeat failed");
                            break;
                        }
                    }
                    message = stream.next() => match message {
                        Some(Ok(Message::Text(text))) => {
                            match serde_json::from_str::<Frame>(text.as_str()) {
                                Ok(frame) if frame.topic == topic => match frame.event.as_str() {
                                    "postgres_changes" => {
                                        if let Some(change) = decode_change(&frame.payload)
                                            && accepts(&pump_filter, &change)
                                            && tx.send(change).is_err()
                                        {
                                            break;
                                        }
                                    }
                                    "phx_error" | "phx_close" => {
                                        warn!(%topic, event = %frame.event, "realtime channel closed by server");
                                        break;
                                    }
                                    _ => {}
                                },
                                Ok(_) => {}
                                Err(err) => debug!(error = %err, "ignoring undecodable realtime frame"),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            if sink.send(Message::Pong(payload)).await.is_err() {
                                break;
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(error = %err, %topic, "realtime socket failed");
                            break;
                        }
                    }
                }
            }

            pumps.remove(&id);
        });
        self.pumps.insert(id, handle);

        Ok(Subscription {
            id,
            table,
            events: rx,
        })
    }

    /// Stop delivery for `id`. Unknown identifiers are ignored.
    pub(super) fn unsubscribe(&self, id: SubscriptionId) {
        if let Some((_, handle)) = self.pumps.remove(&id) {
            handle.abort();
        }
    }
}

fn join_frame(topic: &str, schema: &str, table: Table, filter: &Filter) -> Value {
    let mut change = json!({
        "event": "*",
        "schema": schema,
        "table": table.name(),
    });
    // The server accepts a single equality; the rest is applied on receipt.
    if let Some((column, value)) = filter.clauses().first() {
        change["filter"] = Value::String(format!("{column}=eq.{}", query_value(value)));
    }

    json!({
        "topic": topic,
        "event": "phx_join",
        "ref": JOIN_REF,
        "payload": { "config": { "postgres_changes": [change] } },
    })
}

fn decode_change(payload: &Value) -> Option<RawChange> {
    let data = payload.get("data")?;
    let kind = data.get("type")?.as_str()?.to_string();
    let row = |field: &str| {
        data.get(field)
            .filter(|value| value.as_object().is_some_and(|object| !object.is_empty()))
            .cloned()
    };

    Some(RawChange {
        kind,
        new: row("record"),
        old: row("old_record"),
    })
}

/// Apply the full filter client side. Delete images may only carry the key,
/// so absent columns do not exclude them.
fn accepts(filter: &Filter, change: &RawChange) -> bool {
    match (&change.new, &change.old) {
        (Some(new), _) => filter.matches(new),
        (None, Some(old)) => filter
            .clauses()
            .iter()
            .all(|(column, value)| old.get(column).is_none_or(|found| found == value)),
        (None, None) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_frame_carries_first_clause_as_server_filter() {
        let filter = Filter::eq("room_id", "abc").and_eq("id", 3);
        let frame = join_frame("realtime:questions-x", "public", Table::Questions, &filter);

        let change = &frame["payload"]["config"]["postgres_changes"][0];
        assert_eq!(change["table"], "questions");
        assert_eq!(change["filter"], "room_id=eq.abc");
        assert_eq!(frame["event"], "phx_join");
    }

    #[test]
    fn decodes_postgres_change_payload() {
        let payload = json!({
            "data": {
                "type": "UPDATE",
                "table": "players",
                "record": {"id": "p1", "likes": 2},
                "old_record": {"id": "p1"}
            },
            "ids": [1]
        });

        let change = decode_change(&payload).unwrap();
        assert_eq!(change.kind, "UPDATE");
        assert_eq!(change.new, Some(json!({"id": "p1", "likes": 2})));
        assert_eq!(change.old, Some(json!({"id": "p1"})));
    }

    #[test]
    fn empty_record_is_treated_as_missing() {
        let payload = json!({"data": {"type": "DELETE", "record": {}, "old_record": {"id": 4}}});
        let change = decode_change(&payload).unwrap();
        assert!(change.new.is_none());
    }

    #[test]
    fn key_only_delete_passes_room_filter() {
        let filter = Filter::eq("room_id", "abc");
        assert!(accepts(&filter, &RawChange::delete(json!({"id": 4}))));
        assert!(!accepts(
            &filter,
            &RawChange::delete(json!({"id": 4, "room_id": "zzz"}))
        ));
        assert!(!accepts(
            &filter,
            &RawChange::insert(json!({"id": 4, "room_id": "zzz"}))
        ));
    }
}
