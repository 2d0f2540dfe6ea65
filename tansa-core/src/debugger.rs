//! デバッガのメインロジック

use crate::disasm::{Disassembler, Instruction};
use crate::errors::ERR_NOT_ATTACHED;
use crate::parse::parse_register_value;
use crate::Result;
use std::path::Path;
use tansa_target::{
    register_info_by_name, BreakpointSite, LaunchOptions, Process, RegisterCategory, RegisterId,
    RegisterInfo, RegisterValue, StopReason, Stoppoint, StoppointCollection, StoppointId,
    StoppointMode, VirtAddr, Watchpoint, REGISTER_INFOS,
};
use tracing::debug;

/// 読み取るレジスタの範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterSet {
    /// 汎用レジスタ（orig_rax を除く）
    GeneralPurpose,
    All,
}

impl RegisterSet {
    fn contains(self, info: &RegisterInfo) -> bool {
        match self {
            RegisterSet::All => true,
            RegisterSet::GeneralPurpose => {
                info.category == RegisterCategory::Gpr && info.id != RegisterId::OrigRax
            }
        }
    }
}

/// デバッガ
#[derive(Default)]
pub struct Debugger {
    /// デバッグ対象プロセス
    process: Option<Process>,
}

impl Debugger {
    /// 新しいデバッガを作成する
    pub fn new() -> Self {
        Self { process: None }
    }

    fn require_process(&self) -> Result<&Process> {
        self.process
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!(ERR_NOT_ATTACHED))
    }

    fn require_process_mut(&mut self) -> Result<&mut Process> {
        self.process
            .as_mut()
            .ok_or_else(|| anyhow::anyhow!(ERR_NOT_ATTACHED))
    }

    /// 実行可能ファイルを起動してデバッグを開始する
    ///
    /// プロセスはexec直後に停止状態で開始されます。
    /// 以前のプロセスは破棄されます（起動したものは終了、アタッチしたものはデタッチ）。
    pub fn launch<P: AsRef<Path>>(&mut self, program: P, args: &[String]) -> Result<()> {
        let options = LaunchOptions {
            args: args.to_vec(),
            ..LaunchOptions::default()
        };
        let process = Process::launch(program, options)?;
        debug!("Debugging launched pid {}", process.pid());
        self.process = Some(process);
        Ok(())
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(&mut self, pid: i32) -> Result<()> {
        let process = Process::attach(pid)?;
        debug!("Debugging attached pid {}", process.pid());
        self.process = Some(process);
        Ok(())
    }

    /// デバッグ対象プロセスを取得する
    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    /// プロセスを実行継続し、次に止まるまで待つ
    pub fn continue_execution(&mut self) -> Result<StopReason> {
        let process = self.require_process_mut()?;
        process.resume()?;
        process.wait_on_signal()
    }

    /// 1命令だけ実行する
    pub fn step(&mut self) -> Result<StopReason> {
        self.require_process_mut()?.step_instruction()
    }

    pub fn get_pc(&self) -> Result<VirtAddr> {
        self.require_process()?.get_pc()
    }

    /// 名前でレジスタを読み取る
    pub fn read_register(&self, name: &str) -> Result<(&'static RegisterInfo, RegisterValue)> {
        let process = self.require_process()?;
        let info = register_info_by_name(name)?;
        let value = process.registers().read(info)?;
        Ok((info, value))
    }

    /// レジスタをまとめて読み取る（テーブル順）
    pub fn read_registers(&self, set: RegisterSet) -> Result<Vec<(&'static RegisterInfo, RegisterValue)>> {
        let process = self.require_process()?;
        REGISTER_INFOS
            .iter()
            .filter(|info| set.contains(info))
            .map(|info| process.registers().read(info).map(|value| (info, value)))
            .collect()
    }

    /// 名前でレジスタに書き込む（値はレジスタの形式に従ってパースする）
    pub fn write_register(&mut self, name: &str, text: &str) -> Result<()> {
        let process = self.require_process_mut()?;
        let info = register_info_by_name(name)?;
        let value = parse_register_value(info, text)?;
        process.write_register(info, value)
    }

    pub fn breakpoints(&self) -> Result<&StoppointCollection<BreakpointSite>> {
        Ok(self.require_process()?.breakpoint_sites())
    }

    /// ブレークポイントを作成して有効化する
    ///
    /// 有効化に失敗した場合は作成したサイトを取り除きます。
    pub fn set_breakpoint(&mut self, address: VirtAddr, hardware: bool) -> Result<StoppointId> {
        let process = self.require_process_mut()?;
        let id = process.create_breakpoint_site(address, hardware)?.id();
        if let Err(e) = process.enable_breakpoint_site(id) {
            process.remove_breakpoint_site(id)?;
            return Err(e);
        }
        Ok(id)
    }

    pub fn enable_breakpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.enable_breakpoint_site(id)
    }

    pub fn disable_breakpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.disable_breakpoint_site(id)
    }

    pub fn remove_breakpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.remove_breakpoint_site(id)
    }

    pub fn watchpoints(&self) -> Result<&StoppointCollection<Watchpoint>> {
        Ok(self.require_process()?.watchpoints())
    }

    /// ウォッチポイントを作成して有効化する
    ///
    /// 有効化に失敗した場合は作成したウォッチポイントを取り除きます。
    pub fn set_watchpoint(&mut self, address: VirtAddr, mode: StoppointMode, size: usize) -> Result<StoppointId> {
        let process = self.require_process_mut()?;
        let id = process.create_watchpoint(address, mode, size)?.id();
        if let Err(e) = process.enable_watchpoint(id) {
            process.remove_watchpoint(id)?;
            return Err(e);
        }
        Ok(id)
    }

    pub fn enable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.enable_watchpoint(id)
    }

    pub fn disable_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.disable_watchpoint(id)
    }

    pub fn remove_watchpoint(&mut self, id: StoppointId) -> Result<()> {
        self.require_process_mut()?.remove_watchpoint(id)
    }

    /// メモリを読み取る
    pub fn read_memory(&self, address: VirtAddr, len: usize) -> Result<Vec<u8>> {
        self.require_process()?.read_memory(address, len)
    }

    /// メモリに書き込む
    pub fn write_memory(&mut self, address: VirtAddr, data: &[u8]) -> Result<()> {
        self.require_process_mut()?.write_memory(address, data)
    }

    /// 逆アセンブルする（アドレス省略時は pc から）
    pub fn disassemble(&self, address: Option<VirtAddr>, count: usize) -> Result<Vec<Instruction>> {
        let process = self.require_process()?;
        Disassembler::new()?.disassemble(process, address, count)
    }
}
