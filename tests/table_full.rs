//! 进程表容量边界测试
//!
//! 独立的集成测试二进制：全局进程表从空表开始，可以精确验证
//! 表满/复用行为。与并行用例互相干扰的断言都集中在一个用例里。

use easy_proc::{MAX_PROC, PID_MIN, ProcError, Process, table};
use std::collections::HashSet;

#[test]
fn table_capacity_and_reuse() {
    // 填满：每个创建都成功且 PID 两两不同、落在合法区间
    let mut procs = Vec::new();
    let mut pids = HashSet::new();
    for i in 0..MAX_PROC {
        let proc = Process::new(&format!("filler{}", i)).unwrap();
        let pid = proc.pid();
        assert!((PID_MIN..=MAX_PROC).contains(&pid));
        assert!(pids.insert(pid), "pid {} allocated twice", pid);
        procs.push(proc);
    }
    assert!(!table::is_table_full());

    // 第 N+1 个创建报告表满（区别于内存不足），满标志置位，
    // 未登记的 PCB 被完整退绕
    let err = Process::new("overflow").map(|_| ()).unwrap_err();
    assert_eq!(err, ProcError::TableFull);
    assert!(table::is_table_full());

    // 任何一次释放都清除满标志，随后的创建可以复用某个空槽
    let reaped = procs.swap_remove(MAX_PROC / 2);
    let reaped_pid = reaped.pid();
    reaped.exit(0);
    assert_eq!(reaped.wait(), 0);
    assert!(!table::is_table_full());
    assert!(table::lookup(reaped_pid).is_none());

    let replacement = Process::new("replacement").unwrap();
    assert_eq!(replacement.pid(), reaped_pid);

    // 腾空整张表后 PID 全部可复用
    Process::destroy(replacement);
    for proc in procs {
        Process::destroy(proc);
    }
    for pid in &pids {
        assert!(table::lookup(*pid).is_none());
    }
    let again = Process::new("again").unwrap();
    assert!((PID_MIN..=MAX_PROC).contains(&again.pid()));
    Process::destroy(again);
}
