//! # 进程表模块
//!
//! 提供有界的全局 PID → PCB 映射表 [`ProcTable`]。PID 在
//! `[PID_MIN, MAX_PROC]` 内循环扫描分配，0 号槽位永不使用；
//! 表满时置满标志并由创建路径返回 [`ProcError::TableFull`]。
//!
//! 表锁是自旋锁，临界区只做指针与标志操作，不在持锁期间执行任何
//! 析构或 I/O，保持持锁时间有界。
//!
//! ## PID 复用
//!
//! 分配从上一次分配位置的下一个槽开始向前扫描，近似轮转地复用
//! PID，而不是总挑最小的空闲槽，避免稳态抖动下反复线性重扫。

use crate::error::{ProcError, Result};
use crate::process::Process;
use crate::{MAX_PROC, PID_MIN, Pid};
use alloc::sync::Arc;
use alloc::vec::Vec;
use lazy_static::lazy_static;
use log::{debug, warn};
use spin::Mutex;

/// 有界进程表
///
/// 槽位按 PID 索引，`slots[0]` 永不使用。`last` 记录上一次分配的
/// 槽位索引，`full` 是表满标志；任何一次释放都保证至少一个空槽，
/// 因此释放时无条件清除满标志。
///
/// 表本身不持有锁：全局实例包裹在 `Mutex` 中，测试可以另建私有
/// 实例在无全局状态的情况下验证分配行为。
pub struct ProcTable {
    slots: [Option<Arc<Process>>; MAX_PROC + 1],
    last: usize,
    full: bool,
}

impl ProcTable {
    /// 创建空表
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; MAX_PROC + 1],
            last: 0,
            full: false,
        }
    }

    /// 分配一个 PID 并登记进程
    ///
    /// 从 `last + 1` 起循环扫描一整圈：找到空槽即登记并把 PID 写入
    /// 进程（两把锁都在手，并发的 `lookup` 不会观察到已登记但未
    /// 编号的进程）；扫完一圈没有空槽则置满标志。
    ///
    /// ## Returns
    ///
    /// 分配到的 PID；表满时返回 [`ProcError::TableFull`]，此时不
    /// 触碰进程对象，调用方负责完整退绕未登记的进程。
    pub fn allocate(&mut self, proc: &Arc<Process>) -> Result<Pid> {
        let mut i = self.last;
        for _ in 0..MAX_PROC {
            i += 1;
            if i > MAX_PROC {
                i = PID_MIN;
            }
            if self.slots[i].is_none() {
                self.slots[i] = Some(Arc::clone(proc));
                self.last = i;
                proc.assign_pid(i);
                return Ok(i);
            }
        }
        self.full = true;
        Err(ProcError::TableFull)
    }

    /// 按 PID 查找进程
    ///
    /// 越界的 PID（含 0）直接返回 `None`，不进入临界区。
    pub fn lookup(&self, pid: Pid) -> Option<Arc<Process>> {
        if pid < PID_MIN || pid > MAX_PROC {
            return None;
        }
        let proc = self.slots[pid].clone();
        if let Some(ref p) = proc {
            debug_assert_eq!(p.pid(), pid);
        }
        proc
    }

    /// 释放一个 PID 槽位
    ///
    /// ## Panics
    ///
    /// PID 越界或槽位本就为空时 panic：释放未登记的 PID 是调用方
    /// 的流程错误。
    pub fn release(&mut self, pid: Pid) {
        assert!(pid >= PID_MIN && pid <= MAX_PROC, "pid {} out of range", pid);
        assert!(self.slots[pid].is_some(), "pid {} not registered", pid);
        self.slots[pid] = None;
        // 释放后必有空槽
        self.full = false;
    }

    /// 表满标志快照
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// 当前登记的进程快照
    ///
    /// 只克隆槽位里的共享引用，调用方在临界区之外遍历。
    pub fn snapshot(&self) -> Vec<Arc<Process>> {
        self.slots.iter().flatten().cloned().collect()
    }
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new()
    }
}

lazy_static! {
    /// 全局进程表单例
    ///
    /// 内核生命周期内唯一的 PID → PCB 映射归属地；内核进程本身
    /// 不登记在其中。
    static ref PROC_TABLE: Mutex<ProcTable> = Mutex::new(ProcTable::new());
}

/// 在全局进程表中登记进程，返回分配的 PID
pub(crate) fn register(proc: &Arc<Process>) -> Result<Pid> {
    let result = PROC_TABLE.lock().allocate(proc);
    match result {
        Ok(pid) => debug!("proc table: registered \"{}\" as pid {}", proc.name(), pid),
        Err(_) => warn!("proc table: full, rejecting \"{}\"", proc.name()),
    }
    result
}

/// 从全局进程表注销一个 PID
pub(crate) fn unregister(pid: Pid) {
    PROC_TABLE.lock().release(pid);
    debug!("proc table: released pid {}", pid);
}

/// 按 PID 查找全局进程表
///
/// ## Returns
///
/// 越界（含 0）或槽位为空返回 `None`
pub fn lookup(pid: Pid) -> Option<Arc<Process>> {
    if pid < PID_MIN || pid > MAX_PROC {
        return None;
    }
    PROC_TABLE.lock().lookup(pid)
}

/// 全局进程表是否已满
pub fn is_table_full() -> bool {
    PROC_TABLE.lock().is_full()
}

/// 清除指向某父进程的全部反向链接
///
/// 父进程即将在未收取子进程退出状态的情况下消失时调用：凡父链接
/// 指向 `parent` 的进程都把该链接清空，防止之后解引用一个已回收
/// 的父 PCB。只断开弱链接，不影响子进程自身的生命周期。
///
/// 快照在表锁内完成（纯指针克隆），逐个断链在表锁之外进行，
/// 以免在自旋临界区里嵌套获取各子进程的锁。
pub fn clear_parent_links(parent: Pid) {
    let procs = PROC_TABLE.lock().snapshot();
    for proc in procs {
        proc.clear_parent_if(parent);
    }
}
