pub mod backend;

pub use backend::BackendTarget;

use crate::config::BackendConfig;
use crate::error::{ProxyError, ProxyResult};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// 后端池 - 带在线检测的轮询选择
///
/// 游标始终位于 `[0, len)`。每检查一个目标就通过一次原子读改写推进一步，
/// 并发调用者不会拿到同一个游标位置。
#[derive(Debug)]
pub struct BackendPool {
    targets: Vec<Arc<BackendTarget>>,
    cursor: AtomicUsize,
}

impl BackendPool {
    pub fn new(targets: Vec<BackendTarget>) -> ProxyResult<Self> {
        if targets.is_empty() {
            return Err(ProxyError::EmptyPool);
        }

        Ok(Self {
            targets: targets.into_iter().map(Arc::new).collect(),
            cursor: AtomicUsize::new(0),
        })
    }

    pub fn from_configs(configs: &[BackendConfig]) -> ProxyResult<Self> {
        let targets = configs
            .iter()
            .map(BackendTarget::from_config)
            .collect::<ProxyResult<Vec<_>>>()?;
        Self::new(targets)
    }

    /// 选择下一个在线目标，最多检查一圈
    pub fn select(&self) -> ProxyResult<Arc<BackendTarget>> {
        let len = self.targets.len();

        for _ in 0..len {
            let index = self.advance();
            let target = &self.targets[index];
            if target.is_online() {
                debug!(backend = %target.name(), index, "Selected backend");
                return Ok(target.clone());
            }
        }

        Err(ProxyError::NoBackendAvailable { examined: len })
    }

    /// 推进游标一步，返回推进前的位置
    fn advance(&self) -> usize {
        let len = self.targets.len();
        match self
            .cursor
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |cursor| {
                Some((cursor + 1) % len)
            }) {
            Ok(previous) | Err(previous) => previous,
        }
    }

    pub fn targets(&self) -> &[Arc<BackendTarget>] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn online_count(&self) -> usize {
        self.targets.iter().filter(|t| t.is_online()).count()
    }

    #[cfg(test)]
    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    fn pool_of(states: &[(&str, bool)]) -> BackendPool {
        let targets = states
            .iter()
            .enumerate()
            .map(|(i, (name, online))| {
                BackendTarget::new("127.0.0.1", 9000 + i as u16)
                    .with_name(*name)
                    .with_online(*online)
            })
            .collect();
        BackendPool::new(targets).unwrap()
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        assert!(matches!(BackendPool::new(vec![]), Err(ProxyError::EmptyPool)));
        assert!(matches!(BackendPool::from_configs(&[]), Err(ProxyError::EmptyPool)));
    }

    #[test]
    fn test_round_robin_selection() {
        let pool = pool_of(&[("a", true), ("b", true), ("c", true)]);

        let picks: Vec<String> = (0..4)
            .map(|_| pool.select().unwrap().name().to_string())
            .collect();
        assert_eq!(picks, ["a", "b", "c", "a"]);
    }

    #[test]
    fn test_skip_offline_backends() {
        let pool = pool_of(&[("a", true), ("b", false), ("c", true)]);

        assert_eq!(pool.select().unwrap().name(), "a");
        assert_eq!(pool.select().unwrap().name(), "c");
        assert_eq!(pool.select().unwrap().name(), "a");
        assert_eq!(pool.select().unwrap().name(), "c");
    }

    #[test]
    fn test_all_offline_examines_exactly_one_lap() {
        let pool = pool_of(&[("a", false), ("b", false), ("c", false)]);
        pool.cursor.store(1, Ordering::Release);

        let err = pool.select().unwrap_err();
        assert!(matches!(err, ProxyError::NoBackendAvailable { examined: 3 }));
        // 一整圈后游标回到起点
        assert_eq!(pool.cursor(), 1);

        pool.targets()[2].set_online(true);
        assert_eq!(pool.select().unwrap().name(), "c");
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn test_single_offline_target_always_fails() {
        let pool = pool_of(&[("only", false)]);
        for _ in 0..5 {
            assert!(matches!(
                pool.select(),
                Err(ProxyError::NoBackendAvailable { examined: 1 })
            ));
            assert_eq!(pool.cursor(), 0);
        }
    }

    #[test]
    fn test_single_online_target_is_reoffered() {
        let pool = pool_of(&[("only", true)]);
        for _ in 0..3 {
            assert_eq!(pool.select().unwrap().name(), "only");
        }
    }

    #[test]
    fn test_no_online_target_is_starved() {
        let pool = pool_of(&[
            ("a", false),
            ("b", true),
            ("c", false),
            ("d", true),
            ("e", true),
        ]);

        let mut seen = HashMap::new();
        for _ in 0..30 {
            *seen.entry(pool.select().unwrap().name().to_string()).or_insert(0) += 1;
        }

        assert_eq!(seen.len(), 3);
        assert_eq!(seen["b"], 10);
        assert_eq!(seen["d"], 10);
        assert_eq!(seen["e"], 10);
    }

    #[test]
    fn test_liveness_change_takes_effect_on_next_select() {
        let pool = pool_of(&[("a", true), ("b", true)]);
        pool.targets()[1].set_online(false);

        assert_eq!(pool.select().unwrap().name(), "a");
        assert_eq!(pool.select().unwrap().name(), "a");

        pool.targets()[1].set_online(true);
        assert_eq!(pool.select().unwrap().name(), "b");
        assert_eq!(pool.online_count(), 2);
    }

    #[test]
    fn test_from_configs_preserves_order_and_flags() {
        let pool = BackendPool::from_configs(&[
            BackendConfig::new("127.0.0.1:9001").with_name("service_1"),
            BackendConfig::new("127.0.0.1:9002")
                .with_name("service_2")
                .with_online(false),
            BackendConfig::new("127.0.0.1:9003"),
        ])
        .unwrap();

        let names: Vec<&str> = pool.targets().iter().map(|t| t.name()).collect();
        assert_eq!(names, ["service_1", "service_2", "127.0.0.1:9003"]);
        assert_eq!(pool.online_count(), 2);
    }

    #[test]
    fn test_concurrent_select_is_fair() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 500;

        let pool = Arc::new(pool_of(&[
            ("a", true),
            ("b", true),
            ("c", true),
            ("d", true),
        ]));
        let counts = Arc::new(Mutex::new(HashMap::<String, usize>::new()));

        let handles: Vec<_> = (0..THREADS)
            .map(|_| {
                let pool = pool.clone();
                let counts = counts.clone();
                std::thread::spawn(move || {
                    let mut local = HashMap::<String, usize>::new();
                    for _ in 0..PER_THREAD {
                        let name = pool.select().unwrap().name().to_string();
                        *local.entry(name).or_insert(0) += 1;
                    }
                    let mut counts = counts.lock().unwrap();
                    for (name, n) in local {
                        *counts.entry(name).or_insert(0) += n;
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        // 所有目标在线时每次选择恰好推进一步，总次数是 4 的倍数，分配必须完全均匀
        let counts = counts.lock().unwrap();
        let expected = THREADS * PER_THREAD / 4;
        for name in ["a", "b", "c", "d"] {
            assert_eq!(counts[name], expected, "backend {name} was picked unevenly");
        }
        assert_eq!(pool.cursor(), 0);
    }

    #[test]
    fn test_concurrent_select_with_offline_targets() {
        let pool = Arc::new(pool_of(&[("a", true), ("b", false), ("c", true)]));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        let target = pool.select().unwrap();
                        assert_ne!(target.name(), "b");
                        assert!(pool.cursor() < pool.len());
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }
}
