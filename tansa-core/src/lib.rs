//! Tansa デバッガのコア機能
//!
//! このクレートは、デバッガの中核となるロジックを提供します。
//! コマンドの解釈、値のパース、逆アセンブル、プロセス操作の窓口をまとめます。

pub mod command;
pub mod debugger;
pub mod disasm;
pub mod errors;
pub mod parse;

pub use command::Command;
pub use debugger::{Debugger, RegisterSet};
pub use disasm::{Disassembler, Instruction};
pub use errors::CommandError;

// 他のクレートから使用するために再エクスポート
pub use tansa_target::{StopReason, VirtAddr};

/// デバッガの結果型
pub type Result<T> = anyhow::Result<T>;
