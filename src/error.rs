//! # 错误类型模块
//!
//! 定义进程管理子系统的可恢复错误。违反调用契约的情况（销毁仍持有
//! 线程的进程、等待内核进程等）属于内核自身的 bug，以断言失败处理，
//! 不出现在这里。

use core::fmt;

/// 进程子系统的可恢复错误
///
/// 由系统调用层翻译为用户可见的错误码（例如 `EAGAIN`）。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    /// 进程表已满，没有空闲的 PID 槽位
    TableFull,
    /// 文件描述符表已满
    FdTableFull,
    /// 内存分配失败
    ///
    /// Rust 的全局分配器在分配失败时中止而非返回空指针，因此当前
    /// 没有路径返回该变体；保留它以保持错误分类的完整性。
    NoMemory,
}

impl fmt::Display for ProcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcError::TableFull => write!(f, "process table is full"),
            ProcError::FdTableFull => write!(f, "file descriptor table is full"),
            ProcError::NoMemory => write!(f, "out of memory"),
        }
    }
}

/// 进程子系统内部使用的 Result 别名
pub type Result<T> = core::result::Result<T, ProcError>;
