//! # 处理器与线程挂接模块
//!
//! 维护线程与进程之间的挂接关系，以及"当前线程/当前进程"的
//! 处理器状态。调度器本身（就绪队列、上下文切换）在本 crate 之外，
//! 这里只提供它读写 `curproc` 所需的簿记。
//!
//! ## 反向引用的原子性
//!
//! 线程到进程的反向引用是时钟中断驱动的上下文切换读取"当前进程"
//! 的唯一入口。挂接/摘除分两步完成（进程锁内改计数、线程锁内改
//! 反向引用），两把锁从不嵌套；反向引用的写入位于一把专用短持锁
//! 之后——这把锁承担关中断窗口的职责：切换代码绝不会观察到
//! 写到一半的进程指针。

use crate::process::Process;
use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use lazy_static::lazy_static;
use log::trace;
use spin::Mutex;

/// 内核线程
///
/// 本 crate 关心的只有线程的进程归属；寄存器上下文、内核栈等
/// 属于外部的调度器层。
pub struct Thread {
    name: String,
    /// 进程反向引用，专用短持锁保护（替代关中断窗口）
    proc: Mutex<Option<Arc<Process>>>,
}

impl Thread {
    /// 创建未挂接的线程
    pub fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            proc: Mutex::new(None),
        })
    }

    /// 线程名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 线程当前归属的进程
    pub fn process(&self) -> Option<Arc<Process>> {
        self.proc.lock().clone()
    }
}

/// 把线程挂接到进程
///
/// 线程或进程都可能正是当前的那个。先在进程锁内递增线程计数，
/// 再在线程锁内写入反向引用；两步不在一个临界区内，但切换代码
/// 读到的反向引用要么是旧值要么是新值，不会是半成品。
///
/// ## Panics
///
/// 线程已经挂接在某个进程上时 panic
pub fn attach_thread(proc: &Arc<Process>, thread: &Arc<Thread>) {
    assert!(
        thread.process().is_none(),
        "thread {} already attached",
        thread.name()
    );
    proc.thread_attached();
    *thread.proc.lock() = Some(Arc::clone(proc));
    trace!("proc: thread {} attached to pid {}", thread.name(), proc.pid());
}

/// 把线程从其进程上摘除
///
/// 与挂接对称：进程锁内递减计数（断言原值大于零），线程锁内清空
/// 反向引用。
///
/// ## Panics
///
/// 线程未挂接在任何进程上时 panic
pub fn detach_thread(thread: &Arc<Thread>) {
    let proc = thread
        .process()
        .expect("detach on thread with no process");
    proc.thread_detached();
    *thread.proc.lock() = None;
    trace!("proc: thread {} detached from pid {}", thread.name(), proc.pid());
}

/// 处理器状态
///
/// 单处理器模型：一个核、一个"当前线程"。
struct Processor {
    current: Option<Arc<Thread>>,
}

lazy_static! {
    static ref PROCESSOR: Mutex<Processor> = Mutex::new(Processor { current: None });
}

/// 当前正在本处理器上执行的线程
pub fn current_thread() -> Option<Arc<Thread>> {
    PROCESSOR.lock().current.clone()
}

/// 当前线程归属的进程
///
/// 没有当前线程、或当前线程未挂接时返回 `None`。
pub fn current_process() -> Option<Arc<Process>> {
    current_thread().and_then(|thread| thread.process())
}

/// 切换当前线程，返回先前的当前线程
///
/// 由调度器在上下文切换时调用。
pub fn set_current_thread(thread: Option<Arc<Thread>>) -> Option<Arc<Thread>> {
    let mut processor = PROCESSOR.lock();
    core::mem::replace(&mut processor.current, thread)
}
