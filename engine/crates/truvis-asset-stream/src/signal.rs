use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

#[derive(Default)]
struct SignalState {
    set: bool,
    killed: bool,
}

/// 跨线程唤醒原语
///
/// 二值、电平触发、可重置、可 kill：
/// - `set()` 之后 `wait()` 立即返回，直到有人 `reset()`；多次 `set()` 只会合并成一次唤醒。
/// - `kill()` 是永久的：之后所有 `wait()` 都立即返回，`reset()` 也不会清除 kill 状态。
///
/// 调用方需要在 `wait()` 返回后立刻 `reset()`，再去处理工作，否则会丢失唤醒。
/// `reset()` 和另一个线程的 `wait()` 之间需要调用方自己保证顺序。
#[derive(Default)]
pub struct Signal {
    state: Mutex<SignalState>,
    cond: Condvar,
}
// new & init
impl Signal {
    pub fn new() -> Self {
        Self::default()
    }
}
// tools
impl Signal {
    /// 置位并唤醒所有等待者
    pub fn set(&self) {
        let mut state = self.state.lock();
        state.set = true;
        self.cond.notify_all();
    }

    /// 只清除置位状态，不影响 kill
    pub fn reset(&self) {
        self.state.lock().set = false;
    }

    /// 永久唤醒，幂等
    pub fn kill(&self) {
        let mut state = self.state.lock();
        state.killed = true;
        self.cond.notify_all();
    }

    /// 阻塞直到被置位或被 kill
    pub fn wait(&self) {
        let mut state = self.state.lock();
        while !state.set && !state.killed {
            self.cond.wait(&mut state);
        }
    }

    /// 带超时的等待
    ///
    /// 返回 `true` 表示被置位或被 kill，`false` 表示超时。
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock();
        while !state.set && !state.killed {
            if self.cond.wait_until(&mut state, deadline).timed_out() {
                return state.set || state.killed;
            }
        }
        true
    }
}
// getters
impl Signal {
    #[inline]
    pub fn is_set(&self) -> bool {
        self.state.lock().set
    }
    #[inline]
    pub fn is_killed(&self) -> bool {
        self.state.lock().killed
    }
}

impl std::fmt::Debug for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Signal").field("set", &state.set).field("killed", &state.killed).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn test_wait_returns_after_set() {
        let signal = Arc::new(Signal::new());
        let woke = Arc::new(AtomicBool::new(false));

        let handle = {
            let signal = signal.clone();
            let woke = woke.clone();
            thread::spawn(move || {
                signal.wait();
                woke.store(true, Ordering::SeqCst);
            })
        };

        thread::sleep(Duration::from_millis(20));
        assert!(!woke.load(Ordering::SeqCst));

        signal.set();
        handle.join().unwrap();
        assert!(woke.load(Ordering::SeqCst));
    }

    #[test]
    fn test_set_is_level_triggered() {
        let signal = Signal::new();
        signal.set();
        signal.set();
        signal.set();

        // 已经置位，wait 不会阻塞
        signal.wait();
        assert!(signal.is_set());

        signal.reset();
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_reset_clears_set_state() {
        let signal = Signal::new();
        signal.set();
        signal.reset();
        assert!(!signal.is_set());
        assert!(!signal.wait_timeout(Duration::from_millis(10)));
    }

    #[test]
    fn test_kill_is_permanent() {
        let signal = Signal::new();
        signal.kill();
        signal.kill();
        signal.reset();

        assert!(signal.is_killed());
        signal.wait();
        assert!(signal.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_kill_releases_blocked_waiters() {
        let signal = Arc::new(Signal::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let signal = signal.clone();
                thread::spawn(move || signal.wait())
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        signal.kill();
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
