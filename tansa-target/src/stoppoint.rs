//! ストップポイント（ブレークポイントサイトとウォッチポイント）の共通インターフェース

use crate::process::Inferior;
use crate::tracer::Tracer;
use crate::types::VirtAddr;
use crate::Result;
use std::fmt;

/// ストップポイントID
///
/// 種類ごとに1から順に割り当てられ、再利用されません。
pub type StoppointId = usize;

/// ウォッチポイントの監視モード
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppointMode {
    Write,
    ReadWrite,
    Execute,
}

impl fmt::Display for StoppointMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StoppointMode::Write => "write",
            StoppointMode::ReadWrite => "read_write",
            StoppointMode::Execute => "execute",
        };
        f.write_str(name)
    }
}

/// ストップポイント
pub trait Stoppoint {
    fn id(&self) -> StoppointId;

    fn address(&self) -> VirtAddr;

    fn is_enabled(&self) -> bool;

    /// ストップポイントを有効化する（有効なら何もしない）
    fn enable<T: Tracer>(&mut self, inferior: &mut Inferior<T>) -> Result<()>;

    /// ストップポイントを無効化する（無効なら何もしない）
    fn disable<T: Tracer>(&mut self, inferior: &mut Inferior<T>) -> Result<()>;

    fn at_address(&self, address: VirtAddr) -> bool {
        self.address() == address
    }

    /// `low <= address < high` かどうか
    fn in_range(&self, low: VirtAddr, high: VirtAddr) -> bool {
        low <= self.address() && self.address() < high
    }
}

/// 単調増加するIDの払い出し
#[derive(Debug)]
pub(crate) struct IdSequence {
    next: StoppointId,
}

impl IdSequence {
    pub(crate) fn new() -> Self {
        Self { next: 1 }
    }

    pub(crate) fn peek_next(&self) -> StoppointId {
        self.next
    }

    pub(crate) fn advance(&mut self) -> StoppointId {
        let id = self.next;
        self.next += 1;
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_sequence() {
        let mut ids = IdSequence::new();
        assert_eq!(ids.peek_next(), 1);
        assert_eq!(ids.peek_next(), 1);
        assert_eq!(ids.advance(), 1);
        assert_eq!(ids.advance(), 2);
        assert_eq!(ids.peek_next(), 3);
    }

    #[test]
    fn test_mode_display() {
        assert_eq!(StoppointMode::Write.to_string(), "write");
        assert_eq!(StoppointMode::ReadWrite.to_string(), "read_write");
        assert_eq!(StoppointMode::Execute.to_string(), "execute");
    }
}
