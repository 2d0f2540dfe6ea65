//! ターゲットアドレスなどの基本型

use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

/// 8バイトのベクタ値（MMXレジスタなど）
pub type Byte64 = [u8; 8];

/// 16バイトのベクタ値（XMMレジスタなど）
pub type Byte128 = [u8; 16];

/// デバッグ対象プロセスの仮想アドレス
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// 生の64ビット値からアドレスを作成する
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// 生の64ビット値を取得する
    pub const fn addr(self) -> u64 {
        self.0
    }
}

impl From<u64> for VirtAddr {
    fn from(addr: u64) -> Self {
        Self(addr)
    }
}

impl Add<i64> for VirtAddr {
    type Output = VirtAddr;

    fn add(self, offset: i64) -> Self::Output {
        Self(self.0.wrapping_add_signed(offset))
    }
}

impl Sub<i64> for VirtAddr {
    type Output = VirtAddr;

    fn sub(self, offset: i64) -> Self::Output {
        Self(self.0.wrapping_sub(offset as u64))
    }
}

impl AddAssign<i64> for VirtAddr {
    fn add_assign(&mut self, offset: i64) {
        *self = *self + offset;
    }
}

impl SubAssign<i64> for VirtAddr {
    fn sub_assign(&mut self, offset: i64) {
        *self = *self - offset;
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}
