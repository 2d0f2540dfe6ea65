//! プロセス制御機能

use crate::breakpoint::BreakpointSite;
use crate::collection::StoppointCollection;
use crate::debug_registers::{clear_control, encode_control, find_free_slot, CONTROL_REGISTER_INDEX};
use crate::error::{OsContext, TargetError};
use crate::memory::{splice_word, WORD_SIZE};
use crate::pipe::Pipe;
use crate::register_info::{RegisterId, RegisterInfo};
use crate::registers::{KernelWrite, RegisterValue, Registers};
use crate::stoppoint::{IdSequence, Stoppoint, StoppointId, StoppointMode};
use crate::tracer::{PtraceTracer, Tracer};
use crate::types::VirtAddr;
use crate::watchpoint::Watchpoint;
use crate::Result;
use nix::errno::Errno;
use nix::libc;
use nix::sys::personality::{self, Persona};
use nix::sys::ptrace;
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use nix::unistd::{dup2, execvp, fork, ForkResult, Pid};
use std::convert::Infallible;
use std::ffi::{CStr, CString};
use std::fmt;
use std::os::fd::RawFd;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use tracing::{debug, warn};

/// プロセスの実行状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Stopped,
    Running,
    Exited,
    Terminated,
}

impl fmt::Display for ProcessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProcessState::Stopped => "stopped",
            ProcessState::Running => "running",
            ProcessState::Exited => "exited",
            ProcessState::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// 停止イベントの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// プロセス終了（終了コード）
    Exited(i32),
    /// シグナルによる強制終了
    Terminated(Signal),
    /// シグナルによる停止
    Stopped(Signal),
}

impl StopReason {
    /// 停止イベント後のプロセス状態
    pub fn state(&self) -> ProcessState {
        match self {
            StopReason::Exited(_) => ProcessState::Exited,
            StopReason::Terminated(_) => ProcessState::Terminated,
            StopReason::Stopped(_) => ProcessState::Stopped,
        }
    }

    pub(crate) fn from_wait_status(status: WaitStatus) -> Result<Self> {
        match status {
            WaitStatus::Exited(_, code) => Ok(StopReason::Exited(code)),
            WaitStatus::Signaled(_, signal, _) => Ok(StopReason::Terminated(signal)),
            WaitStatus::Stopped(_, signal) => Ok(StopReason::Stopped(signal)),
            WaitStatus::PtraceEvent(_, signal, _) => Ok(StopReason::Stopped(signal)),
            WaitStatus::PtraceSyscall(_) => Ok(StopReason::Stopped(Signal::SIGTRAP)),
            other => Err(TargetError::UnexpectedWaitStatus(format!("{:?}", other)).into()),
        }
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Exited(code) => write!(f, "exited with status {}", code),
            StopReason::Terminated(signal) => write!(f, "terminated with signal {}", signal),
            StopReason::Stopped(signal) => write!(f, "stopped with signal {}", signal),
        }
    }
}

/// 起動時のオプション
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// プログラムに渡す引数（argv[0] は含まない）
    pub args: Vec<String>,
    /// PTRACE_TRACEME で起動して最初の停止を待つかどうか
    pub debug: bool,
    /// 子プロセスの標準出力を差し替えるファイルディスクリプタ
    pub stdout: Option<RawFd>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            args: Vec::new(),
            debug: true,
            stdout: None,
        }
    }
}

/// トレース対象プロセスそのもの
///
/// トレーサ、実行状態、レジスタイメージを持ちます。
/// ストップポイントは有効化・無効化のときだけこれを借用します。
#[derive(Debug)]
pub struct Inferior<T: Tracer> {
    tracer: T,
    state: ProcessState,
    is_attached: bool,
    registers: Registers,
}

impl<T: Tracer> Inferior<T> {
    pub(crate) fn new(tracer: T, is_attached: bool) -> Self {
        Self {
            tracer,
            state: ProcessState::Stopped,
            is_attached,
            registers: Registers::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.tracer.pid()
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn is_attached(&self) -> bool {
        self.is_attached
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    #[cfg(test)]
    pub(crate) fn tracer(&self) -> &T {
        &self.tracer
    }

    /// 停止中でなければエラーにする
    ///
    /// 終了済みのプロセスはカーネルから見て存在しないので ESRCH を返します。
    pub(crate) fn ensure_stopped(&self, action: &'static str) -> Result<()> {
        match self.state {
            ProcessState::Stopped => Ok(()),
            ProcessState::Running => Err(TargetError::InvalidState {
                action,
                state: self.state,
            }
            .into()),
            ProcessState::Exited | ProcessState::Terminated => Err(TargetError::Os {
                context: format!("Could not {}", action),
                source: Errno::ESRCH,
            }
            .into()),
        }
    }

    pub fn get_pc(&self) -> Result<VirtAddr> {
        Ok(VirtAddr::new(self.registers.read_by_id_as::<u64>(RegisterId::Rip)?))
    }

    pub(crate) fn set_pc(&mut self, pc: VirtAddr) -> Result<()> {
        self.write_register_by_id(RegisterId::Rip, pc.addr())
    }

    /// レジスタへ書き込む
    ///
    /// カーネルへの書き込みが成功してからイメージを更新します。
    pub(crate) fn write_register(&mut self, info: &RegisterInfo, value: RegisterValue) -> Result<()> {
        self.ensure_stopped("write register")?;
        let staged = self.registers.stage_write(info, value)?;
        match staged.kernel_write {
            KernelWrite::Fprs(fprs) => self.tracer.set_fprs(&fprs)?,
            KernelWrite::User { offset, word } => self.tracer.poke_user(offset, word)?,
        }
        self.registers.commit(staged);
        Ok(())
    }

    pub(crate) fn write_register_by_id(
        &mut self,
        id: RegisterId,
        value: impl Into<RegisterValue>,
    ) -> Result<()> {
        self.write_register(id.info(), value.into())
    }

    /// 汎用・浮動小数点・デバッグレジスタをすべて読み直す
    pub(crate) fn read_all_registers(&mut self) -> Result<()> {
        let gprs = self.tracer.get_gprs()?;
        self.registers.load_gprs(&gprs);

        let fprs = self.tracer.get_fprs()?;
        self.registers.load_fprs(&fprs);

        for index in 0..8 {
            let offset = RegisterId::debug(index)?.info().offset;
            let value = self.tracer.peek_user(offset)?;
            self.registers.load_debug_register(index, value)?;
        }
        Ok(())
    }

    /// 次の停止イベントを待ち、状態とレジスタを更新する
    pub(crate) fn wait_on_signal(&mut self) -> Result<StopReason> {
        let status = self.tracer.wait()?;
        let reason = StopReason::from_wait_status(status)?;
        self.state = reason.state();

        if self.is_attached && self.state == ProcessState::Stopped {
            self.read_all_registers()?;
        }
        Ok(reason)
    }

    pub fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
        self.tracer.read_memory(address, len)
    }

    /// 8バイト単位で書き込む
    ///
    /// 末尾の半端な部分は既存のワードと合成するので、範囲外のバイトは変わりません。
    pub(crate) fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> Result<()> {
        self.ensure_stopped("write memory")?;
        for (index, chunk) in data.chunks(WORD_SIZE).enumerate() {
            let at = address + (index * WORD_SIZE) as i64;
            let word = if chunk.len() == WORD_SIZE {
                u64::from_le_bytes(chunk.try_into()?)
            } else {
                splice_word(chunk, self.tracer.peek_data(at)?)?
            };
            self.tracer.poke_data(at, word)?;
        }
        Ok(())
    }

    pub(crate) fn peek_data(&self, address: VirtAddr) -> Result<u64> {
        self.tracer.peek_data(address)
    }

    pub(crate) fn poke_data(&mut self, address: VirtAddr, word: u64) -> Result<()> {
        self.ensure_stopped("write memory")?;
        self.tracer.poke_data(address, word)
    }

    /// デバッグレジスタの現在値（イメージ上の値）
    pub fn debug_register(&self, index: usize) -> Result<u64> {
        self.registers.read_by_id_as::<u64>(RegisterId::debug(index)?)
    }

    /// 実行ブレークポイント用にスロットを確保する
    pub(crate) fn set_hardware_breakpoint(&mut self, id: StoppointId, address: VirtAddr) -> Result<usize> {
        self.set_watchpoint(id, address, StoppointMode::Execute, 1)
    }

    /// 空きスロットにアドレスと条件を設定し、スロット番号を返す
    pub(crate) fn set_watchpoint(
        &mut self,
        id: StoppointId,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<usize> {
        let control = self.debug_register(CONTROL_REGISTER_INDEX)?;
        let index = find_free_slot(control)?;
        let control = encode_control(control, index, mode, size)?;

        self.write_register_by_id(RegisterId::debug(index)?, address.addr())?;
        self.write_register_by_id(RegisterId::debug(CONTROL_REGISTER_INDEX)?, control)?;

        debug!("Stoppoint {} uses DR{} for {} ({}, {} bytes)", id, index, address, mode, size);
        Ok(index)
    }

    /// スロットを解放する（DR7 を先に書き換える）
    pub(crate) fn clear_hardware_stoppoint(&mut self, index: usize) -> Result<()> {
        let control = clear_control(self.debug_register(CONTROL_REGISTER_INDEX)?, index)?;
        self.write_register_by_id(RegisterId::debug(CONTROL_REGISTER_INDEX)?, control)?;
        self.write_register_by_id(RegisterId::debug(index)?, 0u64)?;
        debug!("Released DR{}", index);
        Ok(())
    }
}

/// デバッグ対象のプロセス
///
/// 1つのプロセスにつき1つだけ存在し、ストップポイントとIDの払い出しも管理します。
/// ドロップ時にはデタッチ、もしくは自分で起動したプロセスの終了を行います。
#[derive(Debug)]
pub struct Process<T: Tracer = PtraceTracer> {
    inferior: Inferior<T>,
    terminate_on_end: bool,
    breakpoint_sites: StoppointCollection<BreakpointSite>,
    watchpoints: StoppointCollection<Watchpoint>,
    breakpoint_ids: IdSequence,
    watchpoint_ids: IdSequence,
}

impl Process<PtraceTracer> {
    /// 実行可能ファイルを起動してデバッグ対象プロセスを開始する
    ///
    /// 子プロセスはASLRを無効化し、必要なら標準出力を差し替え、
    /// `debug` が真ならPTRACE_TRACEMEを設定してからexecvpします。
    /// exec前の失敗はclose-on-execのパイプで親に中継されます。
    pub fn launch<P: AsRef<Path>>(program: P, options: LaunchOptions) -> Result<Self> {
        let path = CString::new(program.as_ref().as_os_str().as_bytes())?;
        let mut argv = vec![path.clone()];
        for arg in &options.args {
            argv.push(CString::new(arg.as_str())?);
        }

        let mut channel = Pipe::new(true)?;

        // SAFETY: 子プロセスではexecvpか_exitまで非同期シグナル安全でない処理を最小限にする
        match unsafe { fork() }.os_context("fork failed")? {
            ForkResult::Child => {
                channel.close_read();
                let message = match exec_child(&path, &argv, &options) {
                    Ok(never) => match never {},
                    Err(message) => message,
                };
                let _ = channel.write(message.as_bytes());
                unsafe { libc::_exit(-1) }
            }
            ForkResult::Parent { child } => {
                debug!("Launched {} as pid {}", program.as_ref().display(), child);
                let mut process = Process::from_tracer(PtraceTracer::new(child), true, options.debug);
                if options.debug {
                    process.wait_on_signal()?;
                }

                channel.close_write();
                let message = channel.read_to_end()?;
                if !message.is_empty() {
                    if !options.debug {
                        // exec前に失敗した子は既に終了しているので回収だけ行う
                        let _ = process.inferior.tracer.wait();
                        process.inferior.state = ProcessState::Exited;
                    }
                    return Err(TargetError::ChildStartup(
                        String::from_utf8_lossy(&message).into_owned(),
                    )
                    .into());
                }
                Ok(process)
            }
        }
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(pid: i32) -> Result<Self> {
        if pid <= 0 {
            return Err(TargetError::InvalidPid(pid).into());
        }
        let tracer = PtraceTracer::attach(Pid::from_raw(pid))?;
        let mut process = Process::from_tracer(tracer, false, true);
        process.wait_on_signal()?;
        debug!("Attached to pid {}", pid);
        Ok(process)
    }
}

/// exec前の子プロセスで行う準備
///
/// 成功すれば戻らず、失敗すれば親に中継するメッセージを返す。
fn exec_child(
    path: &CStr,
    argv: &[CString],
    options: &LaunchOptions,
) -> std::result::Result<Infallible, String> {
    let failed = |prefix: &str, errno: Errno| format!("{}: {}", prefix, errno.desc());

    let persona = personality::get().map_err(|e| failed("Could not read personality", e))?;
    personality::set(persona | Persona::ADDR_NO_RANDOMIZE)
        .map_err(|e| failed("Could not disable ASLR", e))?;

    if let Some(fd) = options.stdout {
        dup2(fd, libc::STDOUT_FILENO).map_err(|e| failed("stdout replacement failed", e))?;
    }
    if options.debug {
        ptrace::traceme().map_err(|e| failed("Tracing failed", e))?;
    }
    execvp(path, argv).map_err(|e| failed("exec failed", e))
}

impl<T: Tracer> Process<T> {
    pub(crate) fn from_tracer(tracer: T, terminate_on_end: bool, is_attached: bool) -> Self {
        Self {
            inferior: Inferior::new(tracer, is_attached),
            terminate_on_end,
            breakpoint_sites: StoppointCollection::new(),
            watchpoints: StoppointCollection::new(),
            breakpoint_ids: IdSequence::new(),
            watchpoint_ids: IdSequence::new(),
        }
    }

    pub fn pid(&self) -> Pid {
        self.inferior.pid()
    }

    pub fn state(&self) -> ProcessState {
        self.inferior.state()
    }

    pub fn is_attached(&self) -> bool {
        self.inferior.is_attached()
    }

    pub fn registers(&self) -> &Registers {
        self.inferior.registers()
    }

    pub fn get_pc(&self) -> Result<VirtAddr> {
        self.inferior.get_pc()
    }

    /// 実行を継続する
    ///
    /// pc に有効なブレークポイントがあれば、一時的に無効化して1命令進めてから継続します。
    pub fn resume(&mut self) -> Result<()> {
        self.inferior.ensure_stopped("resume")?;

        let pc = self.get_pc()?;
        if self.breakpoint_sites.enabled_stoppoint_at_address(pc) {
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .disable(&mut self.inferior)?;
            self.inferior.tracer.single_step()?;
            let reason = self.inferior.wait_on_signal()?;
            if reason.state() != ProcessState::Stopped {
                // ステップ中に終了したので継続できない
                return Err(TargetError::Os {
                    context: format!("Could not resume, process {} while stepping over", reason),
                    source: Errno::ESRCH,
                }
                .into());
            }
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .enable(&mut self.inferior)?;
        }

        self.inferior.tracer.cont()?;
        self.inferior.state = ProcessState::Running;
        debug!("Resumed pid {}", self.pid());
        Ok(())
    }

    /// 次の停止イベントを待つ
    ///
    /// ソフトウェアブレークポイントのINT3で止まった場合は pc をその命令の先頭に戻します。
    pub fn wait_on_signal(&mut self) -> Result<StopReason> {
        let reason = self.inferior.wait_on_signal()?;

        if self.inferior.is_attached && reason == StopReason::Stopped(Signal::SIGTRAP) {
            let previous = self.get_pc()? - 1;
            let hit = self
                .breakpoint_sites
                .get_by_address(previous)
                .map(|site| site.is_enabled() && !site.is_hardware())
                .unwrap_or(false);
            if hit {
                self.inferior.set_pc(previous)?;
            }
        }

        debug!("Pid {} {}", self.pid(), reason);
        Ok(reason)
    }

    /// 1命令だけ実行する
    pub fn step_instruction(&mut self) -> Result<StopReason> {
        self.inferior.ensure_stopped("step")?;

        let pc = self.get_pc()?;
        let step_over = self.breakpoint_sites.enabled_stoppoint_at_address(pc);
        if step_over {
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .disable(&mut self.inferior)?;
        }

        self.inferior.tracer.single_step()?;
        let reason = self.wait_on_signal()?;

        if step_over && reason.state() == ProcessState::Stopped {
            self.breakpoint_sites
                .get_by_address_mut(pc)?
                .enable(&mut self.inferior)?;
        }
        Ok(reason)
    }

    pub fn write_register(&mut self, info: &RegisterInfo, value: RegisterValue) -> Result<()> {
        self.inferior.write_register(info, value)
    }

    pub fn write_register_by_id(&mut self, id: RegisterId, value: impl Into<RegisterValue>) -> Result<()> {
        self.inferior.write_register_by_id(id, value)
    }

    /// メモリを読み取る（ブレークポイントのINT3もそのまま見える）
    pub fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
        self.inferior.read_memory(address, len)
    }

    /// 有効なソフトウェアブレークポイントの位置を元のバイトに戻して読み取る
    pub fn read_memory_without_traps(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
        let mut memory = self.read_memory(address, len)?;
        let high = address + memory.len() as i64;

        for site in self.breakpoint_sites.get_in_region(address, high) {
            if !site.is_enabled() || site.is_hardware() {
                continue;
            }
            let offset = (site.address().addr() - address.addr()) as usize;
            memory[offset] = site.saved_data();
        }
        Ok(memory)
    }

    pub fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> Result<()> {
        self.inferior.write_memory(address, data)
    }

    pub fn breakpoint_sites(&self) -> &StoppointCollection<BreakpointSite> {
        &self.breakpoint_sites
    }

    /// 無効状態のブレークポイントサイトを作る
    pub fn create_breakpoint_site(&mut self, address: VirtAddr, hardware: bool) -> Result<&BreakpointSite> {
        if self.breakpoint_sites.contains_address(address) {
            return Err(TargetError::DuplicateBreakpoint(address).into());
        }
        let id = self.breakpoint_ids.advance();
        let site = self
            .breakpoint_sites
            .push(BreakpointSite::new(id, address, hardware));
        debug!("Created breakpoint site {} at {}", id, address);
        Ok(site)
    }

    pub fn enable_breakpoint_site(&mut self, id: StoppointId) -> Result<()> {
        self.inferior.ensure_stopped("enable breakpoint")?;
        self.breakpoint_sites
            .get_by_id_mut(id)?
            .enable(&mut self.inferior)
    }

    pub fn disable_breakpoint_site(&mut self, id: StoppointId) -> Result<()> {
        self.inferior.ensure_stopped("disable breakpoint")?;
        self.breakpoint_sites
            .get_by_id_mut(id)?
            .disable(&mut self.inferior)
    }

    /// 無効化してから取り除く
    pub fn remove_breakpoint_site(&mut self, id: StoppointId) -> Result<()> {
        if self.breakpoint_sites.get_by_id(id)?.is_enabled() {
            self.inferior.ensure_stopped("remove breakpoint")?;
        }
        self.breakpoint_sites.remove_by_id(id, &mut self.inferior)
    }

    pub fn watchpoints(&self) -> &StoppointCollection<Watchpoint> {
        &self.watchpoints
    }

    /// 無効状態のウォッチポイントを作る
    ///
    /// 検証に失敗した場合はIDを消費しません。
    pub fn create_watchpoint(
        &mut self,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<&Watchpoint> {
        if self.watchpoints.contains_address(address) {
            return Err(TargetError::DuplicateWatchpoint(address).into());
        }
        let watchpoint = Watchpoint::new(self.watchpoint_ids.peek_next(), address, mode, size)?;
        let id = self.watchpoint_ids.advance();
        debug!("Created watchpoint {} at {}", id, address);
        Ok(self.watchpoints.push(watchpoint))
    }

    pub fn enable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        self.inferior.ensure_stopped("enable watchpoint")?;
        self.watchpoints.get_by_id_mut(id)?.enable(&mut self.inferior)
    }

    pub fn disable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        self.inferior.ensure_stopped("disable watchpoint")?;
        self.watchpoints.get_by_id_mut(id)?.disable(&mut self.inferior)
    }

    pub fn remove_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        if self.watchpoints.get_by_id(id)?.is_enabled() {
            self.inferior.ensure_stopped("remove watchpoint")?;
        }
        self.watchpoints.remove_by_id(id, &mut self.inferior)
    }

    /// 後始末（失敗しても残りの手順は続ける）
    fn teardown(&mut self) {
        let pid = self.pid();
        if matches!(self.state(), ProcessState::Exited | ProcessState::Terminated) {
            return;
        }

        if self.inferior.is_attached {
            if self.state() == ProcessState::Running {
                log_failure(pid, "stop", self.inferior.tracer.send_signal(Signal::SIGSTOP));
                log_failure(pid, "wait", self.inferior.wait_on_signal().map(|_| ()));
            }

            if !self.terminate_on_end {
                // デタッチ後も動き続けるプロセスにINT3やデバッグレジスタを残さない
                for site in self.breakpoint_sites.iter_mut() {
                    log_failure(pid, "disable breakpoint", site.disable(&mut self.inferior));
                }
                for watchpoint in self.watchpoints.iter_mut() {
                    log_failure(pid, "disable watchpoint", watchpoint.disable(&mut self.inferior));
                }
            }

            log_failure(pid, "detach", self.inferior.tracer.detach());
            log_failure(pid, "continue", self.inferior.tracer.send_signal(Signal::SIGCONT));
            self.inferior.is_attached = false;
        }

        if self.terminate_on_end {
            log_failure(pid, "kill", self.inferior.tracer.send_signal(Signal::SIGKILL));
            log_failure(pid, "reap", self.inferior.tracer.wait().map(|_| ()));
            self.inferior.state = ProcessState::Terminated;
        }
    }
}

fn log_failure(pid: Pid, action: &str, result: Result<()>) {
    if let Err(e) = result {
        warn!("Teardown of pid {}: could not {}: {:#}", pid, action, e);
    }
}

impl<T: Tracer> Drop for Process<T> {
    fn drop(&mut self) {
        self.teardown();
    }
}
