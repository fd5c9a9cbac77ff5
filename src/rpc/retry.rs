//! In-flight table giving at-least-once delivery for commands that expect an answer.

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::config::RetryConfig;
use crate::model::Host;
use crate::rpc::command::{Command, CommandType};
use crate::rpc::transport::Transport;

/// Exponential backoff between resends.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub base_delay: Duration,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Total sends, the first one included.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Delay after the `attempts`-th send: `base * multiplier^(attempts - 1)`, capped.
    pub fn next_delay(&self, attempts: u32) -> Duration {
        let base_secs = self.base_delay.as_secs_f64();
        let delay_secs = base_secs * self.multiplier.powi(attempts.saturating_sub(1) as i32);
        if !delay_secs.is_finite() || delay_secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            base_delay: Duration::from_millis(config.base_delay_ms),
            multiplier: config.multiplier,
            max_delay: Duration::from_millis(config.max_delay_ms),
            max_attempts: config.max_attempts.max(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct InFlightMessage {
    pub task_instance_id: i64,
    pub command: Command,
    pub destination: Host,
    pub attempts: u32,
    pub last_sent_at: Instant,
}

/// Emitted when a command was sent `max_attempts` times without an answer.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedMessage {
    pub task_instance_id: i64,
    pub command_type: CommandType,
    pub destination: Host,
    pub attempts: u32,
}

type MessageKey = (i64, CommandType);

pub struct MessageRetryRunner {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
    in_flight: DashMap<MessageKey, InFlightMessage>,
    exhausted: mpsc::UnboundedSender<ExhaustedMessage>,
}

impl MessageRetryRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        policy: RetryPolicy,
    ) -> (Self, mpsc::UnboundedReceiver<ExhaustedMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let runner = Self {
            transport,
            policy,
            in_flight: DashMap::new(),
            exhausted: tx,
        };
        (runner, rx)
    }

    pub fn local_host(&self) -> &Host {
        self.transport.local_host()
    }

    /// Sends once and keeps the command tracked only if the send went through.
    ///
    /// Callers that have their own fallback for unreachable hosts use this. The entry exists
    /// before the send so an early answer finds it.
    pub async fn send(&self, task_instance_id: i64, to: &Host, command: Command) -> Result<()> {
        let key = (task_instance_id, command.command_type);
        let opaque = command.opaque;
        self.track(task_instance_id, to.clone(), command.clone());
        if let Err(e) = self.transport.send(to, &command).await {
            self.in_flight
                .remove_if(&key, |_, message| message.command.opaque == opaque);
            return Err(e);
        }
        Ok(())
    }

    /// Tracks the command, then sends it. A failed first send is left to the resend ticker.
    pub async fn send_tracked(&self, task_instance_id: i64, to: &Host, command: Command) {
        let command_type = command.command_type;
        self.track(task_instance_id, to.clone(), command.clone());
        if let Err(e) = self.transport.send(to, &command).await {
            warn!(
                task_instance_id,
                command_type = %command_type,
                host = %to,
                error = %e,
                "send failed, will retry"
            );
        }
    }

    /// Sends without tracking. Used for acks and responses.
    pub async fn send_untracked(&self, to: &Host, command: &Command) -> Result<()> {
        self.transport.send(to, command).await
    }

    /// Registers a command as sent once, now. A previous entry with the same key is replaced.
    pub fn track(&self, task_instance_id: i64, destination: Host, command: Command) {
        let key = (task_instance_id, command.command_type);
        self.in_flight.insert(
            key,
            InFlightMessage {
                task_instance_id,
                command,
                destination,
                attempts: 1,
                last_sent_at: Instant::now(),
            },
        );
    }

    /// Removes the entry answered by an ack. Returns false for unknown or duplicate acks.
    pub fn ack(&self, task_instance_id: i64, acknowledged: CommandType) -> bool {
        let removed = self.in_flight.remove(&(task_instance_id, acknowledged)).is_some();
        if removed {
            debug!(task_instance_id, command_type = %acknowledged, "ack received");
        }
        removed
    }

    /// Points every pending command of a task to a new host. Attempt counts are kept.
    pub fn update_host(&self, task_instance_id: i64, host: &Host) {
        for mut entry in self.in_flight.iter_mut() {
            if entry.task_instance_id == task_instance_id {
                entry.destination = host.clone();
                entry.command.source = self.transport.local_host().clone();
            }
        }
    }

    pub fn remove_task(&self, task_instance_id: i64) {
        self.in_flight.retain(|(id, _), _| *id != task_instance_id);
    }

    pub fn contains(&self, task_instance_id: i64, command_type: CommandType) -> bool {
        self.in_flight.contains_key(&(task_instance_id, command_type))
    }

    pub fn attempts(&self, task_instance_id: i64, command_type: CommandType) -> Option<u32> {
        self.in_flight
            .get(&(task_instance_id, command_type))
            .map(|m| m.attempts)
    }

    pub fn destination(&self, task_instance_id: i64, command_type: CommandType) -> Option<Host> {
        self.in_flight
            .get(&(task_instance_id, command_type))
            .map(|m| m.destination.clone())
    }

    pub fn len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn is_empty(&self) -> bool {
        self.in_flight.is_empty()
    }

    /// Resends every entry whose backoff elapsed at `now`; returns how many were resent.
    pub async fn resend_due(&self, now: Instant) -> usize {
        let mut due = Vec::new();
        let mut exhausted = Vec::new();
        for entry in self.in_flight.iter() {
            let elapsed = now.saturating_duration_since(entry.last_sent_at);
            if elapsed < self.policy.next_delay(entry.attempts) {
                continue;
            }
            if entry.attempts >= self.policy.max_attempts {
                exhausted.push(*entry.key());
            } else {
                due.push((*entry.key(), entry.destination.clone(), entry.command.clone()));
            }
        }

        for key in exhausted {
            if let Some((_, message)) = self.in_flight.remove(&key) {
                warn!(
                    task_instance_id = message.task_instance_id,
                    command_type = %key.1,
                    host = %message.destination,
                    attempts = message.attempts,
                    "no answer after max attempts"
                );
                let _ = self.exhausted.send(ExhaustedMessage {
                    task_instance_id: message.task_instance_id,
                    command_type: key.1,
                    destination: message.destination,
                    attempts: message.attempts,
                });
            }
        }

        let mut resent = 0;
        for (key, destination, command) in due {
            if let Err(e) = self.transport.send(&destination, &command).await {
                warn!(task_instance_id = key.0, command_type = %key.1, host = %destination, error = %e, "resend failed");
            }
            // the entry may have been acked while we were sending
            if let Some(mut entry) = self.in_flight.get_mut(&key) {
                entry.attempts += 1;
                entry.last_sent_at = now;
                resent += 1;
                debug!(task_instance_id = key.0, command_type = %key.1, attempts = entry.attempts, "command resent");
            }
        }
        resent
    }

    /// Resend ticker.
    pub async fn run(self: Arc<Self>, tick: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(host = %self.local_host(), "retry runner started");
        let mut interval = tokio::time::interval(tick);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    self.resend_due(Instant::now()).await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(host = %self.local_host(), "retry runner stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            base_delay: Duration::from_secs(2),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10),
            max_attempts: 5,
        }
    }

    #[test]
    fn exponential_backoff_is_capped() {
        let p = policy();
        assert_eq!(p.next_delay(1), Duration::from_secs(2));
        assert_eq!(p.next_delay(2), Duration::from_secs(4));
        assert_eq!(p.next_delay(3), Duration::from_secs(8));
        assert_eq!(p.next_delay(4), Duration::from_secs(10));
        assert_eq!(p.next_delay(60), Duration::from_secs(10));
    }

    #[test]
    fn policy_from_config() {
        let p = RetryPolicy::from(&RetryConfig::default());
        assert_eq!(p.base_delay, Duration::from_secs(5));
        assert_eq!(p.max_attempts, 5);
    }
}
