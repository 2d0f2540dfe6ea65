//! ターゲット制御のエラー型

use crate::process::ProcessState;
use crate::stoppoint::StoppointId;
use crate::VirtAddr;
use nix::errno::Errno;

/// ターゲット制御で発生するエラー
///
/// カーネル呼び出しの失敗、プロトコル違反（検証エラー）、
/// 子プロセス起動時の失敗の3種類に分かれます。
#[derive(Debug, thiserror::Error)]
pub enum TargetError {
    /// ptraceなどのカーネル呼び出しが失敗した
    #[error("{context}: {source}")]
    Os { context: String, source: Errno },

    /// パイプなどの入出力が失敗した
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },

    /// execve前の子プロセスから中継された失敗メッセージ
    #[error("{0}")]
    ChildStartup(String),

    #[error("Invalid PID: {0}")]
    InvalidPid(i32),

    #[error("Cannot {action}: process is {state}")]
    InvalidState {
        action: &'static str,
        state: ProcessState,
    },

    #[error("Unexpected wait status: {0}")]
    UnexpectedWaitStatus(String),

    #[error("Breakpoint site already created at address {0}")]
    DuplicateBreakpoint(VirtAddr),

    #[error("Watchpoint already created at address {0}")]
    DuplicateWatchpoint(VirtAddr),

    #[error("Invalid stoppoint id: {0}")]
    UnknownStoppointId(StoppointId),

    #[error("Stoppoint doesn't exist at address {0}")]
    UnknownStoppointAddress(VirtAddr),

    #[error("Watchpoint size must be 1, 2, 4 or 8 bytes, got {0}")]
    UnsupportedWatchpointSize(usize),

    #[error("Execute watchpoints must be 1 byte wide, got {0}")]
    UnsupportedExecuteSize(usize),

    #[error("Watchpoint must be aligned to size: address {address}, size {size}")]
    MisalignedWatchpoint { address: VirtAddr, size: usize },

    #[error("No free hardware debug register")]
    NoFreeDebugRegister,

    #[error("Invalid hardware debug register index: {0}")]
    InvalidDebugRegister(usize),

    #[error("Unknown register: {0}")]
    UnknownRegister(String),

    #[error("Register {register} is {register_size} bytes, value is {value_size} bytes")]
    RegisterSizeMismatch {
        register: &'static str,
        register_size: usize,
        value_size: usize,
    },

    #[error("Unexpected register size for {register}: {size}")]
    UnexpectedRegisterSize { register: &'static str, size: usize },

    #[error("Register value {0} has an unexpected type")]
    UnexpectedRegisterValue(String),
}

impl TargetError {
    /// カーネル呼び出しの失敗かどうか
    pub fn is_os(&self) -> bool {
        matches!(self, TargetError::Os { .. })
    }
}

/// `nix::Result` にコンテキスト付きのエラーを付与するための拡張トレイト
pub(crate) trait OsContext<T> {
    fn os_context(self, context: &str) -> crate::Result<T>;
}

impl<T> OsContext<T> for nix::Result<T> {
    fn os_context(self, context: &str) -> crate::Result<T> {
        self.map_err(|source| {
            TargetError::Os {
                context: context.to_string(),
                source,
            }
            .into()
        })
    }
}

/// `std::io::Result` 用の拡張トレイト
pub(crate) trait IoContext<T> {
    fn io_context(self, context: &str) -> crate::Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn io_context(self, context: &str) -> crate::Result<T> {
        self.map_err(|source| {
            TargetError::Io {
                context: context.to_string(),
                source,
            }
            .into()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_os_context_message() {
        let result: nix::Result<()> = Err(Errno::ESRCH);
        let err = result.os_context("Could not resume").unwrap_err();
        assert!(err.to_string().starts_with("Could not resume: ESRCH"));

        let kind = err.downcast_ref::<TargetError>().unwrap();
        assert!(kind.is_os());
    }

    #[test]
    fn test_validation_messages() {
        let err = TargetError::MisalignedWatchpoint {
            address: VirtAddr::new(0x1001),
            size: 4,
        };
        assert_eq!(
            err.to_string(),
            "Watchpoint must be aligned to size: address 0x1001, size 4"
        );
        assert!(!err.is_os());
    }
}
