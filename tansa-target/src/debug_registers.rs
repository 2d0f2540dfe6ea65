//! ハードウェアデバッグレジスタ（DR0-DR3, DR7）のエンコード

use crate::error::TargetError;
use crate::stoppoint::StoppointMode;
use crate::Result;

/// アドレススロットの数（DR0-DR3）
pub const HARDWARE_SLOT_COUNT: usize = 4;

/// 制御レジスタ（DR7）のインデックス
pub const CONTROL_REGISTER_INDEX: usize = 7;

/// 空いている最初のスロットを探す
///
/// ローカル／グローバルの有効ビットが両方とも0のスロットを空きとみなします。
pub fn find_free_slot(control: u64) -> Result<usize> {
    (0..HARDWARE_SLOT_COUNT)
        .find(|&index| control & (0b11u64 << (index * 2)) == 0)
        .ok_or_else(|| TargetError::NoFreeDebugRegister.into())
}

fn mode_bits(mode: StoppointMode) -> u64 {
    match mode {
        StoppointMode::Execute => 0b00,
        StoppointMode::Write => 0b01,
        StoppointMode::ReadWrite => 0b11,
    }
}

fn size_bits(size: usize) -> Result<u64> {
    match size {
        1 => Ok(0b00),
        2 => Ok(0b01),
        8 => Ok(0b10),
        4 => Ok(0b11),
        other => Err(TargetError::UnsupportedWatchpointSize(other).into()),
    }
}

/// スロットの設定ビット（有効ビット、モード、サイズ）全体のマスク
pub fn slot_mask(index: usize) -> u64 {
    (0b11 << (index * 2)) | (0b1111 << (index * 4 + 16))
}

/// スロットを有効化した新しい制御値を計算する
pub fn encode_control(control: u64, index: usize, mode: StoppointMode, size: usize) -> Result<u64> {
    if index >= HARDWARE_SLOT_COUNT {
        return Err(TargetError::InvalidDebugRegister(index).into());
    }
    let enable_bit = 1u64 << (index * 2);
    let mode_flag = mode_bits(mode) << (index * 4 + 16);
    let size_flag = size_bits(size)? << (index * 4 + 18);

    Ok((control & !slot_mask(index)) | enable_bit | mode_flag | size_flag)
}

/// スロットを無効化した新しい制御値を計算する
pub fn clear_control(control: u64, index: usize) -> Result<u64> {
    if index >= HARDWARE_SLOT_COUNT {
        return Err(TargetError::InvalidDebugRegister(index).into());
    }
    Ok(control & !slot_mask(index))
}
