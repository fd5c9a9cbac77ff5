use dagflow::model::Host;
use dagflow::rpc::command::TaskKillRequest;
use dagflow::rpc::redis_transport::RedisTransport;
use dagflow::rpc::{Command, CommandType, Transport};
use redis::Client;

fn get_redis_client() -> Client {
    let url = std::env::var("DAGFLOW_REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379/6".to_string());
    redis::Client::open(url).expect("Invalid Redis URL")
}

#[tokio::test]
#[ignore] // needs a running redis, point DAGFLOW_REDIS_URL at it
async fn test_redis_inbox_round_trip() {
    // 1. Clean DB
    let client = get_redis_client();
    let mut conn = client
        .get_multiplexed_async_connection()
        .await
        .expect("Failed to connect to Redis");
    let _: () = redis::cmd("FLUSHDB")
        .query_async(&mut conn)
        .await
        .expect("Failed to flush db");

    // 2. Two members
    let master = RedisTransport::new(client.clone(), Host::new("master:5678"));
    let worker = RedisTransport::new(client, Host::new("worker:1234"));

    // 3. Master sends, worker receives the same command
    let command = Command::new(
        CommandType::TaskKillRequest,
        master.local_host().clone(),
        &TaskKillRequest { task_instance_id: 9 },
    )
    .expect("failed to build command");
    master
        .send(worker.local_host(), &command)
        .await
        .expect("send failed");

    let received = worker
        .recv()
        .await
        .expect("recv failed")
        .expect("inbox empty");
    assert_eq!(received.opaque, command.opaque);
    assert_eq!(received.source, Host::new("master:5678"));
    let body: TaskKillRequest = received.body().expect("bad body");
    assert_eq!(body.task_instance_id, 9);

    // 4. Nothing left for the master
    assert!(master.recv().await.expect("recv failed").is_none());
}
