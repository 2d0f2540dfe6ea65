//! ptraceによるカーネルとのやり取り
//!
//! プロセス制御はすべて [`Tracer`] トレイトを介して行います。
//! 実際のプロセスには [`PtraceTracer`] を使い、テストではメモリ上の偽実装に差し替えます。

use crate::error::OsContext;
use crate::memory::page_chunks;
use crate::types::VirtAddr;
use crate::Result;
use nix::errno::Errno;
use nix::libc::{self, c_void, user_fpregs_struct, user_regs_struct};
use nix::sys::ptrace;
use nix::sys::signal::{self, Signal};
use nix::sys::uio::{process_vm_readv, RemoteIoVec};
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use std::io::IoSliceMut;
use std::ptr;

/// トレース対象プロセスに対するカーネル操作
///
/// 状態を変更する操作は `&mut self` を取ります。
pub trait Tracer {
    fn pid(&self) -> Pid;

    /// シグナルを注入せずに実行を継続する
    fn cont(&mut self) -> Result<()>;

    /// 1命令だけ実行する
    fn single_step(&mut self) -> Result<()>;

    /// 次の状態変化を待つ
    fn wait(&mut self) -> Result<WaitStatus>;

    fn get_gprs(&self) -> Result<user_regs_struct>;

    fn get_fprs(&self) -> Result<user_fpregs_struct>;

    fn set_fprs(&mut self, fprs: &user_fpregs_struct) -> Result<()>;

    /// `struct user` のオフセットから1ワード読み取る
    fn peek_user(&self, offset: usize) -> Result<u64>;

    /// `struct user` のオフセットへ1ワード書き込む
    fn poke_user(&mut self, offset: usize, word: u64) -> Result<()>;

    fn peek_data(&self, address: VirtAddr) -> Result<u64>;

    fn poke_data(&mut self, address: VirtAddr, word: u64) -> Result<()>;

    /// 読めた分だけを返す（要求より短いことがある）
    fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>>;

    fn send_signal(&mut self, signal: Signal) -> Result<()>;

    fn detach(&mut self) -> Result<()>;
}

/// ptraceシステムコールを使う実装
#[derive(Debug)]
pub struct PtraceTracer {
    pid: Pid,
}

impl PtraceTracer {
    pub fn new(pid: Pid) -> Self {
        Self { pid }
    }

    /// 既存のプロセスにアタッチする（停止は待たない）
    pub fn attach(pid: Pid) -> Result<Self> {
        ptrace::attach(pid).os_context("Could not attach")?;
        Ok(Self { pid })
    }
}

impl Tracer for PtraceTracer {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn cont(&mut self) -> Result<()> {
        ptrace::cont(self.pid, None::<Signal>).os_context("Could not resume")
    }

    fn single_step(&mut self) -> Result<()> {
        ptrace::step(self.pid, None::<Signal>).os_context("Could not single step")
    }

    fn wait(&mut self) -> Result<WaitStatus> {
        waitpid(self.pid, None).os_context("waitpid failed")
    }

    fn get_gprs(&self) -> Result<user_regs_struct> {
        ptrace::getregs(self.pid).os_context("Could not read GPR registers")
    }

    fn get_fprs(&self) -> Result<user_fpregs_struct> {
        // SAFETY: user_fpregs_struct はゼロ初期化可能なPOD
        let mut fprs: user_fpregs_struct = unsafe { std::mem::zeroed() };
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_GETFPREGS,
                self.pid.as_raw(),
                ptr::null_mut::<c_void>(),
                &mut fprs as *mut user_fpregs_struct as *mut c_void,
            )
        };
        Errno::result(ret).os_context("Could not read FPR registers")?;
        Ok(fprs)
    }

    fn set_fprs(&mut self, fprs: &user_fpregs_struct) -> Result<()> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_SETFPREGS,
                self.pid.as_raw(),
                ptr::null_mut::<c_void>(),
                fprs as *const user_fpregs_struct as *mut c_void,
            )
        };
        Errno::result(ret).os_context("Could not write floating point registers")?;
        Ok(())
    }

    fn peek_user(&self, offset: usize) -> Result<u64> {
        // PEEKUSER は成功時も -1 を返しうるので errno で判定する
        Errno::clear();
        let word = unsafe {
            libc::ptrace(
                libc::PTRACE_PEEKUSER,
                self.pid.as_raw(),
                offset as *mut c_void,
                ptr::null_mut::<c_void>(),
            )
        };
        if word == -1 {
            let errno = Errno::last();
            if errno != Errno::UnknownErrno {
                return Err(errno).os_context("Could not read from user area");
            }
        }
        Ok(word as u64)
    }

    fn poke_user(&mut self, offset: usize, word: u64) -> Result<()> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEUSER,
                self.pid.as_raw(),
                offset as *mut c_void,
                word as *mut c_void,
            )
        };
        Errno::result(ret).os_context("Could not write to user area")?;
        Ok(())
    }

    fn peek_data(&self, address: VirtAddr) -> Result<u64> {
        let word = ptrace::read(self.pid, address.addr() as *mut c_void)
            .os_context("Could not read memory")?;
        Ok(word as u64)
    }

    fn poke_data(&mut self, address: VirtAddr, word: u64) -> Result<()> {
        let ret = unsafe {
            libc::ptrace(
                libc::PTRACE_POKEDATA,
                self.pid.as_raw(),
                address.addr() as *mut c_void,
                word as *mut c_void,
            )
        };
        Errno::result(ret).os_context("Failed to write memory")?;
        Ok(())
    }

    fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
        let remote: Vec<RemoteIoVec> = page_chunks(address, len)
            .into_iter()
            .map(|(base, len)| RemoteIoVec {
                base: base.addr() as usize,
                len,
            })
            .collect();

        let mut buffer = vec![0u8; len];
        let read = process_vm_readv(self.pid, &mut [IoSliceMut::new(&mut buffer)], &remote)
            .os_context("Could not read process memory")?;
        buffer.truncate(read);
        Ok(buffer)
    }

    fn send_signal(&mut self, signal: Signal) -> Result<()> {
        signal::kill(self.pid, signal).os_context("Could not send signal")
    }

    fn detach(&mut self) -> Result<()> {
        ptrace::detach(self.pid, None::<Signal>).os_context("Could not detach")
    }
}

#[cfg(test)]
pub(crate) mod fake {
    //! メモリ上でカーネルを模倣するトレーサ

    use super::*;
    use crate::registers::{fprs_from_image, fprs_to_bytes, gprs_from_image};
    use nix::libc::user;
    use std::collections::VecDeque;
    use std::mem::{offset_of, size_of};

    pub(crate) struct FakeTracer {
        pub(crate) pid: Pid,
        pub(crate) base: u64,
        pub(crate) memory: Vec<u8>,
        pub(crate) user: Vec<u8>,
        /// wait が返す状態（空なら SIGTRAP での停止）
        pub(crate) statuses: VecDeque<WaitStatus>,
        pub(crate) calls: Vec<String>,
    }

    impl FakeTracer {
        pub(crate) fn new(base: u64, memory: Vec<u8>) -> Self {
            Self {
                pid: Pid::from_raw(4242),
                base,
                memory,
                user: vec![0; size_of::<user>()],
                statuses: VecDeque::new(),
                calls: Vec::new(),
            }
        }

        pub(crate) fn set_user_word(&mut self, offset: usize, word: u64) {
            self.user[offset..offset + 8].copy_from_slice(&word.to_le_bytes());
        }

        pub(crate) fn user_word(&self, offset: usize) -> u64 {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.user[offset..offset + 8]);
            u64::from_le_bytes(bytes)
        }

        pub(crate) fn set_pc(&mut self, pc: u64) {
            self.set_user_word(offset_of!(user, regs) + offset_of!(user_regs_struct, rip), pc);
        }

        pub(crate) fn pc(&self) -> u64 {
            self.user_word(offset_of!(user, regs) + offset_of!(user_regs_struct, rip))
        }

        pub(crate) fn push_status(&mut self, status: WaitStatus) {
            self.statuses.push_back(status);
        }

        pub(crate) fn byte_at(&self, address: u64) -> u8 {
            self.memory[(address - self.base) as usize]
        }

        pub(crate) fn called(&self, call: &str) -> bool {
            self.calls.iter().any(|c| c == call)
        }

        fn range(&self, address: VirtAddr, len: usize) -> nix::Result<std::ops::Range<usize>> {
            let start = address
                .addr()
                .checked_sub(self.base)
                .ok_or(Errno::EIO)? as usize;
            let end = start.checked_add(len).ok_or(Errno::EIO)?;
            if end > self.memory.len() {
                return Err(Errno::EIO);
            }
            Ok(start..end)
        }
    }

    impl Tracer for FakeTracer {
        fn pid(&self) -> Pid {
            self.pid
        }

        fn cont(&mut self) -> Result<()> {
            self.calls.push("cont".to_string());
            Ok(())
        }

        fn single_step(&mut self) -> Result<()> {
            self.calls.push("step".to_string());
            Ok(())
        }

        fn wait(&mut self) -> Result<WaitStatus> {
            self.calls.push("wait".to_string());
            Ok(self
                .statuses
                .pop_front()
                .unwrap_or(WaitStatus::Stopped(self.pid, Signal::SIGTRAP)))
        }

        fn get_gprs(&self) -> Result<user_regs_struct> {
            Ok(gprs_from_image(&self.user))
        }

        fn get_fprs(&self) -> Result<user_fpregs_struct> {
            Ok(fprs_from_image(&self.user))
        }

        fn set_fprs(&mut self, fprs: &user_fpregs_struct) -> Result<()> {
            self.calls.push("setfpregs".to_string());
            let start = offset_of!(user, i387);
            let bytes = fprs_to_bytes(fprs);
            self.user[start..start + bytes.len()].copy_from_slice(bytes);
            Ok(())
        }

        fn peek_user(&self, offset: usize) -> Result<u64> {
            if offset + 8 > self.user.len() {
                return Err(Errno::EIO).os_context("Could not read from user area");
            }
            Ok(self.user_word(offset))
        }

        fn poke_user(&mut self, offset: usize, word: u64) -> Result<()> {
            if offset + 8 > self.user.len() {
                return Err(Errno::EIO).os_context("Could not write to user area");
            }
            self.calls.push(format!("pokeuser {:#x} {:#x}", offset, word));
            self.set_user_word(offset, word);
            Ok(())
        }

        fn peek_data(&self, address: VirtAddr) -> Result<u64> {
            let range = self.range(address, 8).os_context("Could not read memory")?;
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(&self.memory[range]);
            Ok(u64::from_le_bytes(bytes))
        }

        fn poke_data(&mut self, address: VirtAddr, word: u64) -> Result<()> {
            let range = self.range(address, 8).os_context("Failed to write memory")?;
            self.calls.push(format!("pokedata {} {:#x}", address, word));
            self.memory[range].copy_from_slice(&word.to_le_bytes());
            Ok(())
        }

        fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
            let start = self.range(address, 0).os_context("Could not read process memory")?.start;
            let end = (start + len).min(self.memory.len());
            Ok(self.memory[start..end].to_vec())
        }

        fn send_signal(&mut self, signal: Signal) -> Result<()> {
            self.calls.push(format!("signal {}", signal));
            Ok(())
        }

        fn detach(&mut self) -> Result<()> {
            self.calls.push("detach".to_string());
            Ok(())
        }
    }
}
