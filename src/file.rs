//! # 打开文件句柄模块
//!
//! 提供共享的引用计数打开文件句柄 [`OpenFile`]。一个句柄对应一次
//! 打开操作，持有底层文件系统节点、访问模式和当前偏移量；fork 式
//! 复制或 dup 之后，多个描述符表槽位指向同一个句柄，共享偏移量。
//!
//! ## 引用计数不变式
//!
//! 句柄的引用计数等于当前所有进程中指向它的描述符槽位总数；
//! 计数降为零时恰好关闭一次底层节点。偏移量与计数的修改都要求
//! 持有句柄自己的锁。

use crate::Vnode;
use alloc::sync::Arc;
use bitflags::bitflags;
use spin::Mutex;

bitflags! {
    /// 文件打开标志位
    ///
    /// 控制句柄的访问模式。`RDONLY` 为全零，因此"不含写标志"即只读。
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct OpenFlags: u32 {
        const RDONLY = 0;
        const WRONLY = 1 << 0;
        const RDWR = 1 << 1;
        const CREATE = 1 << 9;
        const TRUNC = 1 << 10;
    }
}

impl OpenFlags {
    /// 返回 (可读, 可写) 权限对
    pub fn read_write(&self) -> (bool, bool) {
        if self.is_empty() {
            (true, false)
        } else if self.contains(OpenFlags::WRONLY) {
            (false, true)
        } else {
            (true, true)
        }
    }
}

/// 句柄内部可变状态，受句柄锁保护
struct OpenFileInner {
    /// 当前读写偏移量，被所有共享该句柄的描述符共享
    offset: usize,
    /// 描述符引用计数
    refs: usize,
}

/// 共享的打开文件句柄
///
/// 底层节点引用与访问模式在句柄生命周期内不变；偏移量与引用计数
/// 集中在内部状态中，由句柄锁保护。句柄本身以 `Arc` 在描述符表
/// 之间传递，`Arc` 负责内存存活，[`OpenFile::release`] 负责
/// "最后一个描述符消失时关闭节点"的语义。
pub struct OpenFile {
    vnode: Arc<dyn Vnode>,
    flags: OpenFlags,
    inner: Mutex<OpenFileInner>,
}

impl OpenFile {
    /// 以引用计数 1、偏移量 0 创建新句柄
    ///
    /// 对应一次成功的 open：调用方已经持有 `vnode` 的一个引用，
    /// 该引用的释放由本句柄最终的 [`release`](OpenFile::release) 负责。
    pub fn new(vnode: Arc<dyn Vnode>, flags: OpenFlags) -> Self {
        Self {
            vnode,
            flags,
            inner: Mutex::new(OpenFileInner { offset: 0, refs: 1 }),
        }
    }

    /// 句柄是否可读
    pub fn readable(&self) -> bool {
        self.flags.read_write().0
    }

    /// 句柄是否可写
    pub fn writable(&self) -> bool {
        self.flags.read_write().1
    }

    /// 底层文件系统节点
    pub fn vnode(&self) -> &Arc<dyn Vnode> {
        &self.vnode
    }

    /// 当前偏移量
    pub fn offset(&self) -> usize {
        self.inner.lock().offset
    }

    /// 设置偏移量，返回旧值
    pub fn seek(&self, offset: usize) -> usize {
        let mut inner = self.inner.lock();
        let old = inner.offset;
        inner.offset = offset;
        old
    }

    /// 偏移量前进 `len` 字节（读写完成后由调用方推进）
    pub fn advance(&self, len: usize) {
        self.inner.lock().offset += len;
    }

    /// 当前引用计数（测试与诊断用）
    pub fn refs(&self) -> usize {
        self.inner.lock().refs
    }

    /// 引用计数加一
    ///
    /// 描述符表复制路径在持有全局复制锁与两侧表锁时调用；底层节点
    /// 计数的同步递增 (`Vnode::incref`) 由同一调用点负责。
    pub fn retain(&self) {
        self.inner.lock().refs += 1;
    }

    /// 引用计数减一，降为零时关闭底层节点
    ///
    /// ## Returns
    ///
    /// 本次释放是否触发了底层节点的关闭
    ///
    /// ## Panics
    ///
    /// 引用计数已经为零时 panic，说明释放与复制的配对逻辑有误
    pub fn release(&self) -> bool {
        let mut inner = self.inner.lock();
        assert!(inner.refs > 0, "release on openfile with zero refs");
        inner.refs -= 1;
        if inner.refs == 0 {
            self.vnode.close();
            true
        } else {
            false
        }
    }
}
