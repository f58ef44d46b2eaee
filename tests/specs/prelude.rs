//! Shared fixture for the behavioral specs.

use hive_core::{FakeClock, HiveConfig, Priority, Task};
use hive_engine::QueueEngine;
use hive_registry::AgentRegistry;
use hive_store::MemoryStore;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub struct Stack {
    pub clock: FakeClock,
    pub store: Arc<MemoryStore<FakeClock>>,
    pub engine: QueueEngine<FakeClock>,
    pub registry: AgentRegistry<FakeClock>,
    pub config: HiveConfig,
}

pub fn stack() -> Stack {
    let clock = FakeClock::at(1_700_000_000_000);
    let store = Arc::new(MemoryStore::with_clock(clock.clone()));
    let config = HiveConfig::fast();
    Stack {
        engine: QueueEngine::new(store.clone(), clock.clone(), config.clone()),
        registry: AgentRegistry::new(store.clone(), clock.clone(), config.clone()),
        store,
        clock,
        config,
    }
}

pub fn task(id: &str, class: &str, priority: Priority, clock: &FakeClock) -> Task {
    Task::builder(id, class)
        .priority(priority)
        .payload(serde_json::json!({"x": 1}))
        .timeout_ms(5_000)
        .max_retries(2)
        .build(clock)
}

/// Poll until `check` passes or three seconds elapse.
pub async fn wait_until<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let deadline = Instant::now() + Duration::from_secs(3);
    loop {
        if check().await {
            return;
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
}
