//! # easy-proc 进程生命周期核心
//!
//! 提供教学操作系统内核的进程管理子系统：进程控制块 (PCB) 的创建与销毁、
//! 有界进程标识符表的循环分配与回收、父子进程的 wait/exit 会合协议，
//! 以及进程间共享的引用计数打开文件表（含 fork 式复制）。
//!
//! ## 核心组件
//!
//! - [`Process`] - 进程控制块，进程管理的中心数据结构
//! - [`ProcTable`] - 有界的全局 PID → PCB 映射表
//! - [`FdTable`] - 进程私有的文件描述符表，支持跨进程复制
//! - [`OpenFile`] - 共享的引用计数打开文件句柄
//! - [`Semaphore`] - wait/exit 会合使用的计数信号量
//! - [`Thread`] - 线程与进程之间的挂接关系
//!
//! ## 外部协作者
//!
//! 本 crate 不实现虚拟内存和文件系统，而是通过 trait 接缝消费它们，
//! 类似文件系统 crate 通过 `BlockDevice` 消费块设备：
//!
//! - [`AddrSpace`] - 地址空间：激活/失效由调用方提供，销毁即 `Drop`
//! - [`Vnode`] - 文件系统节点：引用计数与关闭由底层文件系统实现
//!
//! ## 使用示例
//!
//! ```rust,ignore
//! use easy_proc::{Process, table};
//!
//! // 创建进程并注册到全局进程表
//! let child = Process::new("child").unwrap();
//! let pid = child.pid();
//!
//! // 子进程退出后，父进程收取退出状态并回收 PCB
//! child.exit(42);
//! let status = child.wait();
//! assert_eq!(status, 42);
//! assert!(table::lookup(pid).is_none());
//! ```

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod error;
pub mod fd_table;
pub mod file;
pub mod process;
pub mod processor;
pub mod sync;
pub mod table;

pub use error::{ProcError, Result};
pub use fd_table::FdTable;
pub use file::{OpenFile, OpenFlags};
pub use process::{
    ProcState, Process, kernel_process, set_current_addrspace, with_current_addrspace,
};
pub use processor::{Thread, attach_thread, current_process, current_thread, detach_thread};
pub use sync::Semaphore;
pub use table::ProcTable;

/// 进程标识符
///
/// 正整数标识一个已注册的存活进程；`0` 表示尚未注册（或内核进程）。
pub type Pid = usize;

/// 进程表容量上限
///
/// 同时存活的用户进程数不超过该值，PID 取值范围为 `[PID_MIN, MAX_PROC]`。
pub const MAX_PROC: usize = 100;

/// 最小合法 PID，0 号槽位永不使用
pub const PID_MIN: Pid = 1;

/// 每个进程文件描述符表的固定容量
pub const OPEN_MAX: usize = 128;

/// 地址空间抽象
///
/// 由虚拟内存子系统实现。本 crate 只负责地址空间对象的所有权转移与
/// 销毁时机，激活/失效硬件映射的具体方式对本 crate 不透明。
///
/// ## 所有权约定
///
/// 地址空间没有引用计数，同一时刻恰好属于一个进程（这是本设计的已知
/// 限制）。对象销毁即 `Drop`，实现方应在 `Drop` 中释放页表等资源。
pub trait AddrSpace: Send + Sync {
    /// 将本地址空间设为硬件当前映射
    fn activate(&self);

    /// 使硬件当前映射失效
    ///
    /// 进程销毁路径在丢弃当前进程的地址空间对象之前调用，保证 MMU
    /// 不再引用一个正在销毁的地址空间。
    fn deactivate(&self);
}

/// 文件系统节点抽象
///
/// 由 VFS 层实现，承载底层的引用计数与关闭操作。打开文件句柄与
/// 当前工作目录都通过它与文件系统交互。
pub trait Vnode: Send + Sync {
    /// 增加节点引用计数（复制描述符、继承工作目录时调用）
    fn incref(&self);

    /// 减少节点引用计数（释放工作目录引用时调用）
    fn decref(&self);

    /// 关闭节点
    ///
    /// 仅在最后一个打开文件引用消失时调用一次。
    fn close(&self);
}
