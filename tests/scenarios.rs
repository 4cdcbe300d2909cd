//! End-to-end scenarios exercising a pool over real loopback sockets.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

use mpc_comm_pool::message::MessageId;
use mpc_comm_pool::pool::Pool;

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

async fn pool() -> Pool {
    Pool::new(None, None, None, Duration::from_millis(20), 3)
}

#[tokio::test]
async fn two_party_hello() {
    let a = pool().await;
    a.add_server(LOCALHOST, Some(4464), None).await.unwrap();

    let b = pool().await;
    b.add_server(LOCALHOST, Some(4465), None).await.unwrap();

    a.add_client("bob", "127.0.0.1", Some(4465), None).await.unwrap();
    b.add_client("alice", "127.0.0.1", Some(4464), None).await.unwrap();

    a.send("bob", &"Hello!".to_string(), None).await.unwrap();
    let reply: String = b.recv("alice", None).await.unwrap();
    assert_eq!(reply, "Hello!");

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn broadcast_to_trio() {
    let a = pool().await;
    a.add_server(LOCALHOST, Some(4474), None).await.unwrap();
    let b = pool().await;
    b.add_server(LOCALHOST, Some(4475), None).await.unwrap();
    let c = pool().await;
    c.add_server(LOCALHOST, Some(4476), None).await.unwrap();

    a.add_client("bob", "127.0.0.1", Some(4475), None).await.unwrap();
    a.add_client("carol", "127.0.0.1", Some(4476), None).await.unwrap();
    b.add_client("alice", "127.0.0.1", Some(4474), None).await.unwrap();
    c.add_client("alice", "127.0.0.1", Some(4474), None).await.unwrap();

    a.broadcast(&"Hi".to_string(), MessageId::Str("id1".into()), Some(&["bob", "carol"])).await.unwrap();

    let from_b: String = b.recv("alice", Some(MessageId::Str("id1".into()))).await.unwrap();
    let from_c: String = c.recv("alice", Some(MessageId::Str("id1".into()))).await.unwrap();
    assert_eq!(from_b, "Hi");
    assert_eq!(from_c, "Hi");

    a.shutdown().await;
    b.shutdown().await;
    c.shutdown().await;
}

#[tokio::test]
async fn unregistered_poster_is_rejected_with_401() {
    let a = pool().await;
    a.add_server(LOCALHOST, Some(4494), None).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client
        .post("http://127.0.0.1:4494/")
        .header("Cookie", "server_port=9999")
        .body(vec![1, 2, 3])
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::UNAUTHORIZED);

    a.shutdown().await;
}

#[tokio::test]
async fn missing_server_port_cookie_is_rejected_with_400() {
    let a = pool().await;
    a.add_server(LOCALHOST, Some(4495), None).await.unwrap();

    let client = reqwest::Client::new();
    let resp = client.post("http://127.0.0.1:4495/").body(vec![1, 2, 3]).send().await.unwrap();

    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    a.shutdown().await;
}
