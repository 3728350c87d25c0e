use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use chanstr::{
    compose::{NewReply, NewThread, ParentRef},
    identity::IdentityResolver,
    media::{Dimensions, ImageMeta},
    post_number::{to_display_id, to_quote_token},
    relay::{CancelSignal, RelayClient},
    session::MemorySession,
    ChanClient, ClientOptions, Event,
};
use futures_util::{SinkExt, StreamExt};
use secp256k1::{schnorr::Signature, Message, Secp256k1, XOnlyPublicKey};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_tungstenite::{accept_async, tungstenite::Message as TMsg};

type Stored = Arc<Mutex<Vec<Value>>>;

fn contains(list: &Value, v: &Value) -> bool {
    list.as_array().is_some_and(|l| l.contains(v))
}

fn matches(filter: &Value, ev: &Value) -> bool {
    let Some(obj) = filter.as_object() else {
        return false;
    };
    obj.iter().all(|(key, want)| match key.as_str() {
        "ids" => contains(want, &ev["id"]),
        "kinds" => contains(want, &ev["kind"]),
        "authors" => contains(want, &ev["pubkey"]),
        tag if tag.starts_with('#') => ev["tags"]
            .as_array()
            .unwrap()
            .iter()
            .any(|t| t[0].as_str() == Some(&tag[1..]) && contains(want, &t[1])),
        _ => true,
    })
}

/// Minimal relay keeping every published event in memory.
async fn spawn_relay() -> (String, Stored) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let stored: Stored = Arc::default();
    let shared = stored.clone();
    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let store = shared.clone();
            tokio::spawn(async move {
                let Ok(mut ws) = accept_async(stream).await else {
                    return;
                };
                while let Some(Ok(msg)) = ws.next().await {
                    let TMsg::Text(txt) = msg else { continue };
                    let val: Value = serde_json::from_str(&txt).unwrap();
                    match val[0].as_str() {
                        Some("EVENT") => {
                            store.lock().unwrap().push(val[1].clone());
                            let ok = json!(["OK", val[1]["id"], true, ""]);
                            ws.send(TMsg::Text(ok.to_string())).await.unwrap();
                        }
                        Some("REQ") => {
                            let sub = val[1].clone();
                            let filters = val.as_array().unwrap()[2..].to_vec();
                            let found: Vec<Value> = {
                                let events = store.lock().unwrap();
                                events
                                    .iter()
                                    .filter(|ev| filters.iter().any(|f| matches(f, ev)))
                                    .cloned()
                                    .collect()
                            };
                            for ev in found {
                                let msg = json!(["EVENT", sub, ev]);
                                ws.send(TMsg::Text(msg.to_string())).await.unwrap();
                            }
                            let eose = json!(["EOSE", sub]);
                            ws.send(TMsg::Text(eose.to_string())).await.unwrap();
                        }
                        _ => {}
                    }
                }
            });
        }
    });
    (format!("ws://{addr}"), stored)
}

fn client(url: String) -> ChanClient<RelayClient, MemorySession> {
    ChanClient::new(
        RelayClient::new(vec![url], Duration::from_secs(2), Duration::from_secs(2)),
        IdentityResolver::new(MemorySession::new()),
        ClientOptions {
            board_limit: 50,
            retries: 1,
            retry_delay: Duration::from_millis(10),
        },
    )
}

fn assert_valid_signature(ev: &Event) {
    let arr = json!([0, ev.pubkey, ev.created_at, ev.kind, ev.tags, ev.content]);
    let hash: [u8; 32] = Sha256::digest(serde_json::to_vec(&arr).unwrap()).into();
    assert_eq!(hex::encode(hash), ev.id);
    let sig = Signature::from_slice(&hex::decode(&ev.sig).unwrap()).unwrap();
    let pk = XOnlyPublicKey::from_slice(&hex::decode(&ev.pubkey).unwrap()).unwrap();
    Secp256k1::verification_only()
        .verify_schnorr(&sig, &Message::from_digest(hash), &pk)
        .unwrap();
}

fn image() -> ImageMeta {
    ImageMeta {
        url: Some("https://img.example/cat.png".into()),
        mime: Some("image/png".into()),
        dimensions: Some(Dimensions {
            width: 640,
            height: 480,
        }),
        hash: None,
    }
}

#[tokio::test]
async fn thread_round_trip_through_relay() {
    let (url, stored) = spawn_relay().await;
    let chan = client(url);
    let never = CancelSignal::never();

    let op = chan
        .create_thread(&NewThread {
            board: "tech".into(),
            subject: "rust".into(),
            content: "> implying".into(),
            image: image(),
        })
        .await
        .unwrap();
    assert_valid_signature(&op);
    assert_eq!(stored.lock().unwrap().len(), 1);

    let board = chan.fetch_board("tech", &never).await.unwrap();
    assert_eq!(board.len(), 1);
    assert_eq!(board[0].title, "rust");
    assert_eq!(board[0].image_dimensions.map(|d| d.width), Some(640));
    assert!(chan.fetch_board("btc", &never).await.unwrap().is_empty());

    let first = chan
        .create_reply(&NewReply {
            board: "tech".into(),
            root_id: op.id.clone(),
            root_pubkey: op.pubkey.clone(),
            parent: None,
            content: format!("{} based", to_quote_token(&op.id)),
            image: None,
        })
        .await
        .unwrap();
    assert_valid_signature(&first);
    let second = chan
        .create_reply(&NewReply {
            board: "tech".into(),
            root_id: op.id.clone(),
            root_pubkey: op.pubkey.clone(),
            parent: Some(ParentRef {
                id: first.id.clone(),
                pubkey: first.pubkey.clone(),
            }),
            content: ">>99999999 dead link".into(),
            image: Some(image()),
        })
        .await
        .unwrap();

    let thread = chan.fetch_thread(&op.id, &never).await.unwrap();
    assert_eq!(thread.replies.len(), 2);
    assert!(thread.replies.windows(2).all(|w| w[0].created_at <= w[1].created_at));
    assert_eq!(thread.parent_of(&second.id), Some(first.id.as_str()));
    let refs = thread.reference_map();
    assert_eq!(refs.resolve(&to_display_id(&first.id)), Some(first.id.as_str()));
    assert_eq!(
        thread.backlinks(&op.id).iter().map(|e| &e.id).collect::<Vec<_>>(),
        vec![&first.id]
    );

    let board = chan.fetch_board("tech", &never).await.unwrap();
    assert_eq!(board[0].reply_count, 2);
    assert!(board[0].last_activity >= op.created_at);
}

#[tokio::test]
async fn missing_thread_reports_not_found() {
    let (url, _stored) = spawn_relay().await;
    let chan = client(url);
    let err = chan
        .fetch_thread(&"cd".repeat(32), &CancelSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, chanstr::ChanError::NotFound(_)));
}
