//! Tansa ターゲットプロセス制御
//!
//! このクレートは、デバッグ対象のプロセスを制御するための低レベル機能を提供します。
//! ptrace、レジスタアクセス、メモリアクセス、ブレークポイントとウォッチポイントの設定などを行います。

pub mod breakpoint;
pub mod collection;
pub mod debug_registers;
pub mod error;
pub mod memory;
pub mod pipe;
pub mod process;
pub mod register_info;
pub mod registers;
pub mod stoppoint;
pub mod tracer;
pub mod types;
pub mod watchpoint;

pub use breakpoint::BreakpointSite;
pub use collection::StoppointCollection;
pub use error::TargetError;
pub use pipe::Pipe;
pub use process::{Inferior, LaunchOptions, Process, ProcessState, StopReason};
pub use register_info::{
    register_info_by_dwarf_id, register_info_by_id, register_info_by_name, RegisterCategory,
    RegisterFormat, RegisterId, RegisterInfo, REGISTER_INFOS,
};
pub use registers::{Extended80, RegisterValue, Registers};
pub use stoppoint::{Stoppoint, StoppointId, StoppointMode};
pub use tracer::{PtraceTracer, Tracer};
pub use types::{Byte128, Byte64, VirtAddr};
pub use watchpoint::Watchpoint;

/// ターゲット制御の結果型
pub type Result<T> = anyhow::Result<T>;
