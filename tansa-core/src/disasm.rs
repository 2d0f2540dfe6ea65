//! 逆アセンブル機能
//!
//! ブレークポイントのINT3を取り除いたメモリを capstone で逆アセンブルします。

use crate::Result;
use capstone::prelude::*;
use tansa_target::{Process, Tracer, VirtAddr};

/// x86-64 命令の最大長
pub const MAX_INSTRUCTION_LEN: usize = 15;

/// 逆アセンブルされた1命令
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instruction {
    pub address: VirtAddr,
    /// AT&T 構文のテキスト（例: `movq %rsp, %rbp`）
    pub text: String,
}

/// capstone のラッパー
pub struct Disassembler {
    cs: Capstone,
}

impl Disassembler {
    pub fn new() -> Result<Self> {
        let cs = Capstone::new()
            .x86()
            .mode(arch::x86::ArchMode::Mode64)
            .syntax(arch::x86::ArchSyntax::Att)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create Capstone: {}", e))?;
        Ok(Self { cs })
    }

    /// バイト列から最大 `count` 命令を逆アセンブルする
    ///
    /// デコードできない位置に来たらそこで打ち切ります。
    pub fn disassemble_bytes(&self, code: &[u8], address: VirtAddr, count: usize) -> Result<Vec<Instruction>> {
        if code.is_empty() || count == 0 {
            return Ok(Vec::new());
        }

        let insns = self
            .cs
            .disasm_count(code, address.addr(), count)
            .map_err(|e| anyhow::anyhow!("Failed to disassemble: {}", e))?;

        Ok(insns
            .as_ref()
            .iter()
            .map(|insn| {
                let mnemonic = insn.mnemonic().unwrap_or("");
                let text = match insn.op_str() {
                    Some(ops) if !ops.is_empty() => format!("{} {}", mnemonic, ops),
                    _ => mnemonic.to_string(),
                };
                Instruction {
                    address: VirtAddr::new(insn.address()),
                    text,
                }
            })
            .collect())
    }

    /// プロセスのメモリを逆アセンブルする（アドレス省略時は pc から）
    pub fn disassemble<T: Tracer>(
        &self,
        process: &Process<T>,
        address: Option<VirtAddr>,
        count: usize,
    ) -> Result<Vec<Instruction>> {
        let address = match address {
            Some(address) => address,
            None => process.get_pc()?,
        };
        let code = process.read_memory_without_traps(address, count * MAX_INSTRUCTION_LEN)?;
        self.disassemble_bytes(&code, address, count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disassemble_simple() {
        // push %rbp; mov %rsp, %rbp; mov $1, %rax; ret
        let code = [
            0x55, 0x48, 0x89, 0xe5, 0x48, 0xc7, 0xc0, 0x01, 0x00, 0x00, 0x00, 0xc3,
        ];
        let disasm = Disassembler::new().unwrap();
        let insns = disasm.disassemble_bytes(&code, VirtAddr::new(0x1000), 10).unwrap();

        assert_eq!(insns.len(), 4);
        assert_eq!(insns[0].address, VirtAddr::new(0x1000));
        assert!(insns[0].text.starts_with("push"));
        assert!(insns[1].text.contains("%rsp"));
        assert_eq!(insns[2].address, VirtAddr::new(0x1004));
        assert!(insns[2].text.contains("%rax"));
        assert_eq!(insns[3].address, VirtAddr::new(0x100b));
        assert!(insns[3].text.starts_with("ret"));
    }

    #[test]
    fn test_disassemble_respects_count() {
        let code = [0x90; 8];
        let disasm = Disassembler::new().unwrap();
        let insns = disasm.disassemble_bytes(&code, VirtAddr::new(0x2000), 3).unwrap();
        assert_eq!(insns.len(), 3);
        assert_eq!(insns[2].address, VirtAddr::new(0x2002));
        assert_eq!(insns[2].text, "nop");

        assert!(disasm.disassemble_bytes(&[], VirtAddr::new(0x2000), 3).unwrap().is_empty());
    }
}
