//! # 同步原语模块
//!
//! 提供 wait/exit 会合使用的计数信号量。短临界区的互斥（进程表、
//! 描述符表、打开文件句柄）直接使用 `spin::Mutex`，只有父进程等待
//! 子进程退出这一处需要"等到事件发生"的语义，由 [`Semaphore`] 承担。

use core::hint;
use spin::Mutex;

/// 计数信号量
///
/// wait/exit 会合原语：终止的进程 `up` 一次，恰好唤醒一个 `down`
/// 中的等待者。`up` 先行发生于对应 `down` 的返回（由内部互斥锁的
/// 获取/释放建立顺序）。
///
/// 本 crate 没有自己的调度器可以挂起线程，`down` 以自旋让出的方式
/// 等待；嵌入内核时等待方是将要阻塞的内核线程，自旋窗口即子进程
/// 从写入退出状态到 `up` 之间的间隙。
///
/// ## Examples
///
/// ```rust
/// use easy_proc::Semaphore;
///
/// let sem = Semaphore::new(0);
/// sem.up();
/// sem.down(); // 立即返回
/// ```
pub struct Semaphore {
    count: Mutex<usize>,
}

impl Semaphore {
    /// 创建初始计数为 `count` 的信号量
    pub const fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
        }
    }

    /// V 操作：计数加一，释放一个等待者
    pub fn up(&self) {
        *self.count.lock() += 1;
    }

    /// P 操作：计数大于零则减一返回，否则自旋等待
    pub fn down(&self) {
        loop {
            {
                let mut count = self.count.lock();
                if *count > 0 {
                    *count -= 1;
                    return;
                }
            }
            hint::spin_loop();
        }
    }

    /// 非阻塞 P 操作
    ///
    /// ## Returns
    ///
    /// 成功取得一个计数返回 `true`，计数为零返回 `false`
    pub fn try_down(&self) -> bool {
        let mut count = self.count.lock();
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn up_then_down() {
        let sem = Semaphore::new(0);
        assert!(!sem.try_down());
        sem.up();
        sem.up();
        sem.down();
        assert!(sem.try_down());
        assert!(!sem.try_down());
    }

    #[test]
    fn down_blocks_until_up() {
        let sem = Arc::new(Semaphore::new(0));
        let posted = Arc::new(Semaphore::new(0));
        let (s, p) = (Arc::clone(&sem), Arc::clone(&posted));
        let waiter = thread::spawn(move || {
            s.down();
            // up 先行发生于 down 的返回
            assert!(p.try_down());
        });
        posted.up();
        sem.up();
        waiter.join().unwrap();
    }
}
