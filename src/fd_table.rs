//! # 文件描述符表模块
//!
//! 提供进程私有的固定容量文件描述符表 [`FdTable`]：小整数描述符到
//! 共享打开文件句柄的映射。表由自己的锁保护；跨进程复制
//! ([`FdTable::copy_into`]) 在一个全局复制锁下进行，以固定的加锁
//! 顺序避免两个方向相反的复制互相死锁。
//!
//! ## 加锁次序
//!
//! 涉及多张表的操作必须按 **全局复制锁 → 源表锁 → 目标表锁** 的
//! 次序获取，逆序释放。这是本子系统唯一的死锁避免机制，任何新增的
//! 多表操作都要遵守同一次序。

use crate::error::{ProcError, Result};
use crate::file::OpenFile;
use crate::OPEN_MAX;
use alloc::sync::Arc;
use lazy_static::lazy_static;
use log::trace;
use spin::Mutex;

lazy_static! {
    /// 全局复制次序锁
    ///
    /// 所有跨表复制先取它再取两侧表锁，保证表锁的获取次序全局一致。
    static ref FT_COPY_LOCK: Mutex<()> = Mutex::new(());
}

/// 进程私有的文件描述符表
///
/// 固定 [`OPEN_MAX`] 个槽位，每个槽位为空或指向一个共享句柄。
/// 表被其所属进程独占拥有，槽位数组整体位于表锁之后。
pub struct FdTable {
    slots: Mutex<[Option<Arc<OpenFile>>; OPEN_MAX]>,
}

impl FdTable {
    /// 创建全空的描述符表
    pub fn new() -> Self {
        Self {
            slots: Mutex::new([const { None }; OPEN_MAX]),
        }
    }

    /// 查找描述符对应的句柄
    ///
    /// ## Returns
    ///
    /// 越界或槽位为空返回 `None`，否则返回句柄的共享引用
    pub fn get(&self, fd: usize) -> Option<Arc<OpenFile>> {
        if fd >= OPEN_MAX {
            return None;
        }
        self.slots.lock()[fd].clone()
    }

    /// 在第一个空闲槽位安放句柄
    ///
    /// 从描述符 0 开始寻找第一个空槽。描述符空间没有保留槽位，
    /// "0 号槽位不用"的约定只属于 PID 空间。
    ///
    /// ## Returns
    ///
    /// 分配到的描述符编号；所有槽位都被占用时返回
    /// [`ProcError::FdTableFull`]
    pub fn alloc(&self, file: Arc<OpenFile>) -> Result<usize> {
        let mut slots = self.slots.lock();
        match slots.iter().position(|slot| slot.is_none()) {
            Some(fd) => {
                slots[fd] = Some(file);
                Ok(fd)
            }
            None => Err(ProcError::FdTableFull),
        }
    }

    /// 在指定槽位安放句柄，返回被顶替的旧句柄
    ///
    /// dup2 式操作的底座。被顶替句柄的 [`OpenFile::release`]
    /// 由调用方负责。
    ///
    /// ## Panics
    ///
    /// 描述符越界时 panic
    pub fn install(&self, fd: usize, file: Arc<OpenFile>) -> Option<Arc<OpenFile>> {
        assert!(fd < OPEN_MAX, "fd {} out of range", fd);
        self.slots.lock()[fd].replace(file)
    }

    /// 关闭一个描述符
    ///
    /// 清空槽位并释放句柄引用；最后一个引用会关闭底层节点。
    ///
    /// ## Returns
    ///
    /// 槽位原本是否被占用
    pub fn close(&self, fd: usize) -> bool {
        if fd >= OPEN_MAX {
            return false;
        }
        let file = self.slots.lock()[fd].take();
        match file {
            Some(file) => {
                file.release();
                true
            }
            None => false,
        }
    }

    /// 释放整张表（进程销毁路径）
    ///
    /// 逐槽位取下句柄并释放引用。对每个句柄先取其锁再减计数，
    /// 降为零时由句柄关闭底层节点；与进行中的复制互斥由表锁保证，
    /// 因此不会在复制引用某句柄的同时关闭它。
    pub fn clear(&self) {
        let mut slots = self.slots.lock();
        for slot in slots.iter_mut() {
            if let Some(file) = slot.take() {
                if file.release() {
                    trace!("fd_table: last reference dropped, vnode closed");
                }
            }
        }
    }

    /// 当前被占用的槽位数（诊断与测试用）
    pub fn open_count(&self) -> usize {
        self.slots.lock().iter().filter(|s| s.is_some()).count()
    }

    /// 将本表复制到 `dst`
    ///
    /// fork 式进程复制时调用：目标进程继承源进程的全部描述符，
    /// 两侧槽位指向同一批句柄。每个被复制的句柄递增自身引用计数
    /// 与底层节点计数；目标表应当是新建的空表，原有内容被覆盖。
    ///
    /// 三把锁按全局次序获取（复制锁 → 源 → 目标），借助守卫的
    /// 逆序析构逆序释放。复制期间两张表上的并发关闭/销毁都会在
    /// 表锁上排队，复制因此是原子的。
    pub fn copy_into(&self, dst: &FdTable) {
        let _copy = FT_COPY_LOCK.lock();
        let src_slots = self.slots.lock();
        let mut dst_slots = dst.slots.lock();
        for fd in 0..OPEN_MAX {
            dst_slots[fd] = match &src_slots[fd] {
                Some(file) => {
                    file.vnode().incref();
                    file.retain();
                    Some(Arc::clone(file))
                }
                None => None,
            };
        }
    }
}

impl Default for FdTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::OpenFlags;
    use crate::Vnode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// 记录引用计数操作次数的测试节点
    struct CountingVnode {
        increfs: AtomicUsize,
        decrefs: AtomicUsize,
        closes: AtomicUsize,
    }

    impl CountingVnode {
        fn new() -> Self {
            Self {
                increfs: AtomicUsize::new(0),
                decrefs: AtomicUsize::new(0),
                closes: AtomicUsize::new(0),
            }
        }
    }

    impl Vnode for CountingVnode {
        fn incref(&self) {
            self.increfs.fetch_add(1, Ordering::SeqCst);
        }
        fn decref(&self) {
            self.decrefs.fetch_add(1, Ordering::SeqCst);
        }
        fn close(&self) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn open(vnode: &Arc<CountingVnode>) -> Arc<OpenFile> {
        Arc::new(OpenFile::new(
            Arc::clone(vnode) as Arc<dyn Vnode>,
            OpenFlags::RDWR,
        ))
    }

    #[test]
    fn alloc_reuses_first_free_slot() {
        let vnode = Arc::new(CountingVnode::new());
        let table = FdTable::new();
        let fd0 = table.alloc(open(&vnode)).unwrap();
        let fd1 = table.alloc(open(&vnode)).unwrap();
        let fd2 = table.alloc(open(&vnode)).unwrap();
        assert_eq!((fd0, fd1, fd2), (0, 1, 2));

        assert!(table.close(fd1));
        assert_eq!(table.alloc(open(&vnode)).unwrap(), 1);
    }

    #[test]
    fn alloc_fails_when_full() {
        let vnode = Arc::new(CountingVnode::new());
        let table = FdTable::new();
        for _ in 0..OPEN_MAX {
            table.alloc(open(&vnode)).unwrap();
        }
        assert_eq!(table.alloc(open(&vnode)), Err(ProcError::FdTableFull));
    }

    #[test]
    fn duplicated_handle_survives_source_close() {
        let vnode = Arc::new(CountingVnode::new());
        let src = FdTable::new();
        let dst = FdTable::new();
        let fd = src.alloc(open(&vnode)).unwrap();

        src.copy_into(&dst);
        assert_eq!(dst.get(fd).unwrap().refs(), 2);
        assert_eq!(vnode.increfs.load(Ordering::SeqCst), 1);

        // 源进程关闭后，句柄仍通过目标表可用
        assert!(src.close(fd));
        assert_eq!(vnode.closes.load(Ordering::SeqCst), 0);
        let file = dst.get(fd).unwrap();
        assert!(file.readable() && file.writable());
        assert_eq!(file.refs(), 1);

        // 两侧都关闭后，底层节点恰好关闭一次；释放路径不走 decref
        assert!(dst.close(fd));
        assert_eq!(vnode.closes.load(Ordering::SeqCst), 1);
        assert_eq!(vnode.decrefs.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shared_offset_after_copy() {
        let vnode = Arc::new(CountingVnode::new());
        let src = FdTable::new();
        let dst = FdTable::new();
        let fd = src.alloc(open(&vnode)).unwrap();
        src.copy_into(&dst);

        src.get(fd).unwrap().advance(64);
        assert_eq!(dst.get(fd).unwrap().offset(), 64);
        dst.get(fd).unwrap().seek(16);
        assert_eq!(src.get(fd).unwrap().offset(), 16);
    }

    #[test]
    fn clear_releases_every_slot_once() {
        let vnode = Arc::new(CountingVnode::new());
        let table = FdTable::new();
        for _ in 0..4 {
            table.alloc(open(&vnode)).unwrap();
        }
        table.clear();
        assert_eq!(table.open_count(), 0);
        assert_eq!(vnode.closes.load(Ordering::SeqCst), 4);
    }
}
