use dagflow::master::{PriorityDispatchQueue, TaskPriority};
use dagflow::model::Priority;
use proptest::prelude::*;
use std::sync::Arc;
use std::time::Duration;

fn priority(level: u8) -> Priority {
    match level % 5 {
        0 => Priority::Highest,
        1 => Priority::High,
        2 => Priority::Medium,
        3 => Priority::Low,
        _ => Priority::Lowest,
    }
}

fn entry(process_level: u8, process_id: i64, task_level: u8, task_id: i64) -> TaskPriority {
    TaskPriority::new(priority(process_level), process_id, priority(task_level), task_id, 0, "default")
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("failed to build runtime")
}

#[derive(Debug, Clone)]
enum Op {
    Put(u8, i64, u8, i64),
    Take,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (0u8..5, 0i64..20, 0u8..5, 0i64..50).prop_map(|(a, b, c, d)| Op::Put(a, b, c, d)),
        1 => Just(Op::Take),
    ]
}

proptest! {
    #[test]
    fn drains_in_ascending_order(entries in prop::collection::vec((0u8..5, 0i64..20, 0u8..5, 0i64..50), 1..40)) {
        let rt = runtime();
        let taken = rt.block_on(async {
            let queue = PriorityDispatchQueue::new(entries.len());
            for (a, b, c, d) in &entries {
                queue.put(entry(*a, *b, *c, *d)).await.expect("put failed");
            }
            let mut taken = Vec::new();
            while let Some(p) = queue.poll(Duration::from_millis(1)).await.expect("poll failed") {
                taken.push(p);
            }
            taken
        });
        prop_assert_eq!(taken.len(), entries.len());
        for pair in taken.windows(2) {
            prop_assert!(pair[0] <= pair[1]);
        }
    }

    #[test]
    fn take_returns_smallest_queued(ops in prop::collection::vec(op(), 1..60)) {
        let rt = runtime();
        rt.block_on(async {
            let queue = PriorityDispatchQueue::new(ops.len());
            let mut model: Vec<TaskPriority> = Vec::new();
            for op in &ops {
                match op {
                    Op::Put(a, b, c, d) => {
                        let e = entry(*a, *b, *c, *d);
                        model.push(e.clone());
                        queue.put(e).await.expect("put failed");
                    }
                    Op::Take => {
                        let got = queue.poll(Duration::from_millis(1)).await.expect("poll failed");
                        let expected = model.iter().min().cloned();
                        if let Some(expected) = &expected {
                            let index = model.iter().position(|p| p == expected).expect("entry in model");
                            model.remove(index);
                        }
                        assert_eq!(got, expected);
                    }
                }
            }
            assert_eq!(queue.len().await, model.len());
        });
    }
}

#[tokio::test]
async fn test_process_priority_beats_task_priority() {
    let queue = PriorityDispatchQueue::new(8);
    queue.put(entry(2, 1, 0, 10)).await.expect("put failed");
    queue.put(entry(0, 2, 4, 20)).await.expect("put failed");
    queue.put(entry(2, 1, 1, 11)).await.expect("put failed");

    let order: Vec<i64> = vec![
        queue.take().await.expect("take failed").task_instance_id,
        queue.take().await.expect("take failed").task_instance_id,
        queue.take().await.expect("take failed").task_instance_id,
    ];
    assert_eq!(order, vec![20, 10, 11]);
}

#[tokio::test]
async fn test_put_waits_for_free_slot() {
    let queue = Arc::new(PriorityDispatchQueue::new(1));
    queue.put(entry(2, 1, 2, 1)).await.expect("put failed");

    // 1. Full queue: put does not complete
    let blocked = tokio::time::timeout(Duration::from_millis(50), queue.put(entry(2, 1, 2, 2))).await;
    assert!(blocked.is_err());

    // 2. A take frees the slot for a waiting put
    let waiting = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.put(entry(2, 1, 2, 3)).await })
    };
    assert_eq!(queue.take().await.expect("take failed").task_instance_id, 1);
    tokio::time::timeout(Duration::from_secs(1), waiting)
        .await
        .expect("put stayed blocked")
        .expect("put task panicked")
        .expect("put failed");
    assert!(queue.contains(3).await);
}

#[tokio::test]
async fn test_take_waits_for_put() {
    let queue = Arc::new(PriorityDispatchQueue::new(4));
    let taker = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.take().await })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!taker.is_finished());

    queue.put(entry(1, 5, 1, 50)).await.expect("put failed");
    let taken = tokio::time::timeout(Duration::from_secs(1), taker)
        .await
        .expect("take stayed blocked")
        .expect("take task panicked")
        .expect("take failed");
    assert_eq!(taken.task_instance_id, 50);
}

#[tokio::test]
async fn test_poll_gives_up_on_empty_queue() {
    let queue = PriorityDispatchQueue::new(2);
    let polled = queue.poll(Duration::from_millis(10)).await.expect("poll failed");
    assert!(polled.is_none());
}
