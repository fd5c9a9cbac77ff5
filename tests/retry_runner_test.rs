use async_trait::async_trait;
use dagflow::model::Host;
use dagflow::rpc::command::TaskKillRequest;
use dagflow::rpc::{Command, CommandType, InMemoryNetwork, MessageRetryRunner, RetryPolicy, Transport};
use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};
use tokio::sync::watch;

const MASTER: &str = "master:5678";
const WORKER: &str = "worker:1234";
const OTHER_WORKER: &str = "worker-2:1234";

fn policy() -> RetryPolicy {
    RetryPolicy {
        base_delay: Duration::from_millis(20),
        multiplier: 2.0,
        max_delay: Duration::from_millis(200),
        max_attempts: 3,
    }
}

fn kill(task_instance_id: i64) -> Command {
    Command::new(
        CommandType::TaskKillRequest,
        Host::new(MASTER),
        &TaskKillRequest { task_instance_id },
    )
    .expect("failed to build command")
}

fn later(secs: u64) -> Instant {
    Instant::now() + Duration::from_secs(secs)
}

#[tokio::test]
async fn test_unacked_command_is_resent() {
    let network = InMemoryNetwork::new();
    let worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    // 1. First send
    let command = kill(1);
    runner.send_tracked(1, &Host::new(WORKER), command.clone()).await;
    assert_eq!(worker.drain().await.len(), 1);

    // 2. Backoff not elapsed yet
    assert_eq!(runner.resend_due(Instant::now()).await, 0);

    // 3. Backoff elapsed: the same command goes out again
    assert_eq!(runner.resend_due(later(1)).await, 1);
    let resent = worker.drain().await;
    assert_eq!(resent.len(), 1);
    assert_eq!(resent[0].opaque, command.opaque);
    assert_eq!(runner.attempts(1, CommandType::TaskKillRequest), Some(2));
}

#[tokio::test]
async fn test_acked_command_is_not_resent() {
    let network = InMemoryNetwork::new();
    let worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    worker.drain().await;

    assert!(runner.ack(1, CommandType::TaskKillRequest));
    assert_eq!(runner.resend_due(later(1)).await, 0);
    assert!(worker.drain().await.is_empty());

    // duplicate ack
    assert!(!runner.ack(1, CommandType::TaskKillRequest));
    assert!(runner.is_empty());
}

#[tokio::test]
async fn test_ack_only_clears_its_own_command_type() {
    let network = InMemoryNetwork::new();
    let _worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    assert!(!runner.ack(1, CommandType::TaskDispatchRequest));
    assert!(runner.contains(1, CommandType::TaskKillRequest));
}

#[tokio::test]
async fn test_host_change_redirects_and_keeps_attempts() {
    let network = InMemoryNetwork::new();
    let first = network.join(Host::new(WORKER));
    let second = network.join(Host::new(OTHER_WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    // 1. Sent and resent once to the first host
    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    runner.resend_due(later(1)).await;
    assert_eq!(first.drain().await.len(), 2);

    // 2. Host changes
    runner.update_host(1, &Host::new(OTHER_WORKER));
    assert_eq!(
        runner.destination(1, CommandType::TaskKillRequest),
        Some(Host::new(OTHER_WORKER))
    );

    // 3. Next resend goes to the new host and keeps counting
    runner.resend_due(later(2)).await;
    assert!(first.drain().await.is_empty());
    assert_eq!(second.drain().await.len(), 1);
    assert_eq!(runner.attempts(1, CommandType::TaskKillRequest), Some(3));
}

#[tokio::test]
async fn test_exhausted_command_is_reported_and_dropped() {
    let network = InMemoryNetwork::new();
    let _worker = network.join(Host::new(WORKER));
    let (runner, mut exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    runner.send_tracked(7, &Host::new(WORKER), kill(7)).await;
    runner.resend_due(later(1)).await;
    runner.resend_due(later(2)).await;
    assert_eq!(runner.attempts(7, CommandType::TaskKillRequest), Some(3));

    // the third send was the last one
    assert_eq!(runner.resend_due(later(3)).await, 0);
    let message = exhausted.try_recv().expect("no exhausted message");
    assert_eq!(message.task_instance_id, 7);
    assert_eq!(message.command_type, CommandType::TaskKillRequest);
    assert_eq!(message.destination, Host::new(WORKER));
    assert_eq!(message.attempts, 3);
    assert!(!runner.contains(7, CommandType::TaskKillRequest));
}

#[tokio::test]
async fn test_unreachable_host_is_retried_until_it_recovers() {
    let network = InMemoryNetwork::new();
    let worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    // 1. Down: plain send fails and tracks nothing, tracked send keeps the entry
    network.set_down(&Host::new(WORKER), true);
    assert!(runner.send(2, &Host::new(WORKER), kill(2)).await.is_err());
    assert!(!runner.contains(2, CommandType::TaskKillRequest));
    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    assert!(runner.contains(1, CommandType::TaskKillRequest));

    // 2. Back up: the resend arrives
    network.set_down(&Host::new(WORKER), false);
    runner.resend_due(later(1)).await;
    assert_eq!(worker.drain().await.len(), 1);
}

#[tokio::test]
async fn test_remove_task_drops_every_command_of_the_task() {
    let network = InMemoryNetwork::new();
    let _worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());

    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    runner.track(1, Host::new(WORKER), Command::new(
        CommandType::TaskSavepointRequest,
        Host::new(MASTER),
        &serde_json::json!({ "taskInstanceId": 1 }),
    ).expect("failed to build command"));
    runner.send_tracked(2, &Host::new(WORKER), kill(2)).await;
    assert_eq!(runner.len(), 3);

    runner.remove_task(1);
    assert_eq!(runner.len(), 1);
    assert!(runner.contains(2, CommandType::TaskKillRequest));
}

#[tokio::test]
async fn test_ticker_resends_until_shutdown() {
    let network = InMemoryNetwork::new();
    let worker = network.join(Host::new(WORKER));
    let (runner, _exhausted) = MessageRetryRunner::new(Arc::new(network.join(Host::new(MASTER))), policy());
    let runner = Arc::new(runner);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    runner.send_tracked(1, &Host::new(WORKER), kill(1)).await;
    let ticker = tokio::spawn(Arc::clone(&runner).run(Duration::from_millis(5), shutdown_rx));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(worker.drain().await.len() >= 2);

    shutdown_tx.send(true).expect("ticker gone");
    tokio::time::timeout(Duration::from_secs(1), ticker)
        .await
        .expect("ticker did not stop")
        .expect("ticker panicked");
}

/// Answers every kill request before `send` returns.
struct InstantAckTransport {
    host: Host,
    runner: OnceLock<Weak<MessageRetryRunner>>,
}

#[async_trait]
impl Transport for InstantAckTransport {
    fn local_host(&self) -> &Host {
        &self.host
    }

    async fn send(&self, _to: &Host, command: &Command) -> anyhow::Result<()> {
        if let Some(runner) = self.runner.get().and_then(Weak::upgrade) {
            let body: TaskKillRequest = command.body()?;
            runner.ack(body.task_instance_id, command.command_type);
        }
        Ok(())
    }

    async fn recv(&self) -> anyhow::Result<Option<Command>> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_ack_during_send_is_not_lost() {
    let transport = Arc::new(InstantAckTransport {
        host: Host::new(MASTER),
        runner: OnceLock::new(),
    });
    let (runner, _exhausted) = MessageRetryRunner::new(transport.clone(), policy());
    let runner = Arc::new(runner);
    transport
        .runner
        .set(Arc::downgrade(&runner))
        .expect("runner already set");

    runner.send(1, &Host::new(WORKER), kill(1)).await.expect("send failed");
    assert!(!runner.contains(1, CommandType::TaskKillRequest));
    assert_eq!(runner.resend_due(later(1)).await, 0);
}
