//! # 进程控制块模块
//!
//! 提供进程控制块 (Process Control Block, PCB) 的实现，管理进程的
//! 完整生命周期：创建并登记到进程表、线程挂接、地址空间与工作目录
//! 的所有权、退出状态的记录，以及父进程 wait 路径上的最终回收。
//!
//! ## 核心组件
//!
//! - [`Process`] - 进程控制块，不变部分直接访问，可变部分受锁保护
//! - [`ProcessInner`] - PCB 内部可变状态，位于 `p_lock`（自旋锁）之后
//! - [`ProcState`] - 进程状态：运行中 / 已退出
//! - [`kernel_process`] - 代表内核自身的特殊 PCB
//!
//! ## 生命周期
//!
//! ```text
//! 创建:  Process::new ──登记进程表──► 获得 PID ──attach──► 运行
//!                          │
//!                          └─ 表满: TableFull，部分资源全部退绕
//!
//! 终止:  exit(status) ──► Exited，信号量 V
//!                              │
//! 回收:  父进程 wait ◄── 信号量 P ──► 读状态 ──► destroy
//! ```
//!
//! ## 会合协议
//!
//! 每个 PCB 携带一个初始计数为 0 的信号量。终止方写入退出状态之后
//! `up` 一次；等待方 `down` 阻塞到退出发生，读出状态，然后销毁
//! PCB——**PCB 的存储归等待者消费，而不是归退出线程自己**。信号量
//! 恰好投递一次唤醒，[`Process::wait`] 按值消费 `Arc` 句柄，同一
//! 句柄上的第二次等待在编译期即被拒绝。
//!
//! ## 并发安全
//!
//! `p_lock` 是自旋锁，只保护指针级别的字段修改，从不跨越阻塞调用
//! 或析构工作；真正的阻塞只发生在会合信号量上。

use crate::fd_table::FdTable;
use crate::processor::current_process;
use crate::sync::Semaphore;
use crate::table;
use crate::{AddrSpace, Pid, Result, Vnode};
use alloc::boxed::Box;
use alloc::string::String;
use alloc::string::ToString;
use alloc::sync::Arc;
use lazy_static::lazy_static;
use log::{debug, info};
use spin::Mutex;

/// 进程状态
///
/// 会合协议的两个状态：终止线程把进程从 `Running` 推进到 `Exited`
/// （先写状态字段，再释放会合原语），等待者消费之后 PCB 即销毁，
/// 不存在第三个状态。
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ProcState {
    /// 进程尚未退出
    Running,
    /// 进程已退出，退出状态等待父进程收取
    Exited,
}

/// PCB 内部可变状态
///
/// 所有运行期会变化的字段集中于此，受外层自旋锁保护。
pub struct ProcessInner {
    /// 进程标识符，0 表示尚未登记（内核进程恒为 0）
    pid: Pid,
    /// 挂接在本进程上的线程数
    ///
    /// 本设计中用户进程至多拥有一个线程，内核进程可拥有多个；
    /// 字段本身是通用的计数。
    numthreads: usize,
    /// 进程地址空间；`None` 表示仅内核态、没有用户映射
    ///
    /// 地址空间没有引用计数，恰好被一个进程独占（已知限制），
    /// 因此放在 `Box` 而不是共享指针里。
    addrspace: Option<Box<dyn AddrSpace>>,
    /// 当前工作目录的节点引用
    cwd: Option<Arc<dyn Vnode>>,
    /// 父进程的弱反向链接
    ///
    /// 只是一个 PID，使用时经进程表解析；父进程先行消失时由
    /// [`table::clear_parent_links`] 清空，绝不构成所有权边。
    parent: Option<Pid>,
    /// 进程状态
    state: ProcState,
    /// 退出状态，`exit` 写入、`wait` 读出
    exit_status: i32,
}

/// 进程控制块
///
/// 名字、描述符表与会合信号量在进程生命周期内位置不变，可以无锁
/// 访问；其余字段集中在 [`ProcessInner`] 中由 `p_lock` 保护。PCB
/// 以 `Arc` 共享：进程表持有一份，父进程持有一份，挂接的线程通过
/// 反向引用持有一份。
pub struct Process {
    name: String,
    fd_table: FdTable,
    exit_sem: Semaphore,
    inner: Mutex<ProcessInner>,
}

lazy_static! {
    /// 内核进程
    ///
    /// 承载所有内核线程的特殊 PCB：不登记进程表、PID 恒为 0、
    /// 永不销毁，也是唯一允许多线程挂接的进程。
    static ref KERNEL_PROCESS: Arc<Process> = {
        info!("proc: kernel process bootstrapped");
        Process::bare("[kernel]")
    };
}

/// 内核进程的共享引用
pub fn kernel_process() -> Arc<Process> {
    Arc::clone(&KERNEL_PROCESS)
}

impl Process {
    /// 构造未登记的 PCB（所有字段为初始值）
    ///
    /// 创建路径与内核进程引导共用；除内核进程外，调用方必须随后
    /// 在进程表登记，否则该 PCB 对 `lookup` 不可见。
    pub(crate) fn bare(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            fd_table: FdTable::new(),
            exit_sem: Semaphore::new(0),
            inner: Mutex::new(ProcessInner {
                pid: 0,
                numthreads: 0,
                addrspace: None,
                cwd: None,
                parent: None,
                state: ProcState::Running,
                exit_status: 0,
            }),
        })
    }

    /// 创建进程并登记到全局进程表
    ///
    /// ## Returns
    ///
    /// 登记完成、已持有 PID 的 PCB；进程表满时返回
    /// [`ProcError::TableFull`](crate::ProcError::TableFull)。
    ///
    /// ## 失败退绕
    ///
    /// 登记失败是创建路径上唯一需要回滚的地方：此时 PCB 尚未被
    /// 任何全局结构引用，`Err` 返回后名字、锁与信号量随 drop 全部
    /// 释放，不留下部分构造的残骸。
    pub fn new(name: &str) -> Result<Arc<Self>> {
        let proc = Self::bare(name);
        table::register(&proc)?;
        Ok(proc)
    }

    /// 为程序装载创建进程
    ///
    /// 与 [`Process::new`] 相同，另外继承**当前**进程的工作目录：
    /// 在当前进程的锁内递增节点引用计数并复制引用。地址空间保持
    /// 为空，由装载器随后填充。
    ///
    /// 复制时只需锁当前进程——新进程此刻只有我们一个引用，
    /// 无需加锁。
    pub fn new_for_program(name: &str) -> Result<Arc<Self>> {
        let proc = Self::new(name)?;
        if let Some(cur) = current_process() {
            let cur_inner = cur.inner.lock();
            if let Some(cwd) = &cur_inner.cwd {
                cwd.incref();
                proc.inner.lock().cwd = Some(Arc::clone(cwd));
            }
        }
        Ok(proc)
    }

    /// 进程名
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 进程标识符，0 表示未登记
    pub fn pid(&self) -> Pid {
        self.inner.lock().pid
    }

    /// 登记时写入 PID，进程表在持有表锁时调用
    pub(crate) fn assign_pid(&self, pid: Pid) {
        self.inner.lock().pid = pid;
    }

    /// 是否为内核进程
    pub fn is_kernel(&self) -> bool {
        core::ptr::eq(self, Arc::as_ptr(&KERNEL_PROCESS))
    }

    /// 进程是否已退出
    pub fn is_exited(&self) -> bool {
        self.inner.lock().state == ProcState::Exited
    }

    /// 父进程 PID（弱链接，可能已失效，使用时经进程表解析）
    pub fn parent(&self) -> Option<Pid> {
        self.inner.lock().parent
    }

    /// 设置父进程链接
    pub fn set_parent(&self, parent: Option<Pid>) {
        self.inner.lock().parent = parent;
    }

    /// 父链接恰好指向 `parent` 时将其清空（断链扫描用）
    pub(crate) fn clear_parent_if(&self, parent: Pid) {
        let mut inner = self.inner.lock();
        if inner.parent == Some(parent) {
            inner.parent = None;
        }
    }

    /// 本进程的文件描述符表
    pub fn fd_table(&self) -> &FdTable {
        &self.fd_table
    }

    /// 当前工作目录节点
    pub fn cwd(&self) -> Option<Arc<dyn Vnode>> {
        self.inner.lock().cwd.clone()
    }

    /// 替换工作目录引用，返回旧引用（chdir 底座）
    ///
    /// 节点引用计数的增减遵循 VFS 约定，由调用方负责：新引用在
    /// 传入前 `incref`，旧引用由调用方 `decref`。
    pub fn set_cwd(&self, cwd: Option<Arc<dyn Vnode>>) -> Option<Arc<dyn Vnode>> {
        let mut inner = self.inner.lock();
        core::mem::replace(&mut inner.cwd, cwd)
    }

    /// 挂接线程数
    pub fn thread_count(&self) -> usize {
        self.inner.lock().numthreads
    }

    pub(crate) fn thread_attached(&self) {
        self.inner.lock().numthreads += 1;
    }

    pub(crate) fn thread_detached(&self) {
        let mut inner = self.inner.lock();
        assert!(inner.numthreads > 0, "detach with no attached thread");
        inner.numthreads -= 1;
    }

    /// 替换进程的地址空间，返回旧地址空间
    ///
    /// 只在锁内交换指针，不激活也不失效硬件映射——那是调用方的
    /// 责任（销毁路径依赖这一点来保证先失效再析构的次序）。
    pub fn set_addrspace(
        &self,
        new: Option<Box<dyn AddrSpace>>,
    ) -> Option<Box<dyn AddrSpace>> {
        let mut inner = self.inner.lock();
        core::mem::replace(&mut inner.addrspace, new)
    }

    /// 在进程锁内访问地址空间
    ///
    /// 地址空间不带引用计数，把引用借出锁外是不安全的；闭包形式
    /// 保证访问期间指针不会在并发销毁下失效。
    pub fn with_addrspace<R>(
        &self,
        f: impl FnOnce(Option<&mut (dyn AddrSpace + 'static)>) -> R,
    ) -> R {
        let mut inner = self.inner.lock();
        f(inner.addrspace.as_deref_mut())
    }

    /// 记录退出状态并发出退出信号
    ///
    /// 由终止中的进程调用恰好一次：先在锁内写入状态字段并推进到
    /// [`ProcState::Exited`]，释放锁之后对会合信号量 `up`。状态
    /// 写入先行发生于信号量释放，等待者在 `down` 返回后读到的
    /// 必然是最终值。
    pub fn exit(&self, status: i32) {
        {
            let mut inner = self.inner.lock();
            debug_assert_eq!(inner.state, ProcState::Running, "double exit");
            inner.exit_status = status;
            inner.state = ProcState::Exited;
        }
        self.exit_sem.up();
        debug!("proc: \"{}\" (pid {}) exited, status {}", self.name, self.pid(), status);
    }

    /// 等待进程退出并回收其 PCB
    ///
    /// 在会合信号量上等待到 [`Process::exit`] 发生，读出退出状态，
    /// 然后销毁 PCB。按值消费 `Arc` 句柄：恰好一个等待者收取一个
    /// 进程的退出，同一句柄无法等待两次。
    ///
    /// 没有取消或超时语义——这是面向单所有者父子句柄的刻意简化。
    ///
    /// ## Returns
    ///
    /// 对应 `exit` 调用记录的退出状态
    ///
    /// ## Panics
    ///
    /// 对内核进程调用时 panic
    pub fn wait(self: Arc<Self>) -> i32 {
        assert!(!self.is_kernel(), "wait on the kernel process");
        self.exit_sem.down();
        let status = {
            let inner = self.inner.lock();
            debug_assert_eq!(inner.state, ProcState::Exited);
            inner.exit_status
        };
        Process::destroy(self);
        status
    }

    /// 销毁 PCB，释放其占有的全部资源
    ///
    /// 前置条件：不是内核进程，且没有线程仍然挂接（调用方必须先
    /// 全部 detach；这里断言而不恢复）。各步骤按固定次序执行：
    ///
    /// 1. 释放工作目录引用；
    /// 2. 摘除地址空间——若本进程恰是当前进程，先把指针换成空、
    ///    再失效硬件映射、最后析构对象。次序不可颠倒：并发的时钟
    ///    中断绝不能把一个销毁到一半的地址空间当作"当前"观察到。
    ///    非当前进程的地址空间不在硬件里，直接摘下析构即可；
    /// 3. 从进程表注销（会合信号量随 PCB 一起消亡）；
    /// 4. 清空文件描述符表——每个占用槽位释放一个句柄引用，计数
    ///    降为零的句柄关闭底层节点。复制持表锁进行，进行中的复制
    ///    完成之前本步骤在表锁上排队；
    /// 5. 其余（名字、锁、PCB 本体）随最后一个 `Arc` 引用消失。
    pub fn destroy(proc: Arc<Self>) {
        assert!(!proc.is_kernel(), "destroy the kernel process");
        assert_eq!(proc.thread_count(), 0, "destroy with attached threads");

        let cwd = proc.set_cwd(None);
        if let Some(cwd) = cwd {
            cwd.decref();
        }

        let is_current = current_process().is_some_and(|cur| Arc::ptr_eq(&cur, &proc));
        if is_current {
            if let Some(aspace) = proc.set_addrspace(None) {
                aspace.deactivate();
                drop(aspace);
            }
        } else if let Some(aspace) = proc.set_addrspace(None) {
            // 不是当前进程，硬件映射里没有它，无需失效
            drop(aspace);
        }

        let pid = proc.pid();
        if pid != 0 {
            table::unregister(pid);
        }

        proc.fd_table.clear();
        debug!("proc: \"{}\" (pid {}) destroyed", proc.name, pid);
    }
}

/// 替换**当前**进程的地址空间，返回旧地址空间
///
/// 调用方负责处置或恢复旧值，并自行完成激活/失效。
///
/// ## Panics
///
/// 没有当前进程时 panic
pub fn set_current_addrspace(
    new: Option<Box<dyn AddrSpace>>,
) -> Option<Box<dyn AddrSpace>> {
    let proc = current_process().expect("set_current_addrspace with no current process");
    proc.set_addrspace(new)
}

/// 在当前进程的锁内访问其地址空间
///
/// 没有当前进程时以 `None` 调用闭包。
pub fn with_current_addrspace<R>(
    f: impl FnOnce(Option<&mut (dyn AddrSpace + 'static)>) -> R,
) -> R {
    match current_process() {
        Some(proc) => proc.with_addrspace(f),
        None => f(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FlagSpace {
        deactivated: Arc<AtomicUsize>,
        dropped: Arc<AtomicUsize>,
    }

    impl AddrSpace for FlagSpace {
        fn activate(&self) {}
        fn deactivate(&self) {
            self.deactivated.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl Drop for FlagSpace {
        fn drop(&mut self) {
            self.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn kernel_process_is_distinguished() {
        let kproc = kernel_process();
        assert!(kproc.is_kernel());
        assert_eq!(kproc.pid(), 0);
        assert!(table::lookup(0).is_none());

        let proc = Process::new("user").unwrap();
        assert!(!proc.is_kernel());
        Process::destroy(proc);
    }

    #[test]
    fn set_addrspace_returns_old() {
        let deactivated = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let proc = Process::bare("as-test");

        let old = proc.set_addrspace(Some(Box::new(FlagSpace {
            deactivated: Arc::clone(&deactivated),
            dropped: Arc::clone(&dropped),
        })));
        assert!(old.is_none());
        assert!(proc.with_addrspace(|a| a.is_some()));

        let old = proc.set_addrspace(None).unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);
        drop(old);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(deactivated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn destroy_drops_non_current_addrspace_without_deactivate() {
        let deactivated = Arc::new(AtomicUsize::new(0));
        let dropped = Arc::new(AtomicUsize::new(0));
        let proc = Process::new("vm").unwrap();
        proc.set_addrspace(Some(Box::new(FlagSpace {
            deactivated: Arc::clone(&deactivated),
            dropped: Arc::clone(&dropped),
        })));
        Process::destroy(proc);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
        assert_eq!(deactivated.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn exit_status_round_trip() {
        for status in [i32::MIN, -1, 0, 1, 42, i32::MAX] {
            let proc = Process::new("rt").unwrap();
            let pid = proc.pid();
            proc.exit(status);
            assert!(proc.is_exited());
            assert_eq!(proc.wait(), status);
            assert!(table::lookup(pid).is_none());
        }
    }
}
