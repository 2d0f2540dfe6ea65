//! ウォッチポイント（ハードウェアデータブレークポイント）

use crate::error::TargetError;
use crate::process::Inferior;
use crate::stoppoint::{Stoppoint, StoppointId, StoppointMode};
use crate::tracer::Tracer;
use crate::types::VirtAddr;
use crate::Result;
use tracing::debug;

/// アドレス範囲 `[address, address + size)` へのアクセスで停止するストップポイント
#[derive(Debug)]
pub struct Watchpoint {
    id: StoppointId,
    address: VirtAddr,
    mode: StoppointMode,
    size: usize,
    enabled: bool,
    hardware_register_index: Option<usize>,
}

impl Watchpoint {
    /// サイズと整列を検証してウォッチポイントを作る（無効状態）
    pub(crate) fn new(
        id: StoppointId,
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    ) -> Result<Self> {
        validate(address, mode, size)?;
        Ok(Self {
            id,
            address,
            mode,
            size,
            enabled: false,
            hardware_register_index: None,
        })
    }

    pub fn mode(&self) -> StoppointMode {
        self.mode
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn hardware_register_index(&self) -> Option<usize> {
        self.hardware_register_index
    }
}

/// ハードウェアが扱える組み合わせかどうかを確認する
pub(crate) fn validate(address: VirtAddr, mode: StoppointMode, size: usize) -> Result<()> {
    if !matches!(size, 1 | 2 | 4 | 8) {
        return Err(TargetError::UnsupportedWatchpointSize(size).into());
    }
    if mode == StoppointMode::Execute && size != 1 {
        return Err(TargetError::UnsupportedExecuteSize(size).into());
    }
    if address.addr() % size as u64 != 0 {
        return Err(TargetError::MisalignedWatchpoint { address, size }.into());
    }
    Ok(())
}

impl Stoppoint for Watchpoint {
    fn id(&self) -> StoppointId {
        self.id
    }

    fn address(&self) -> VirtAddr {
        self.address
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn enable<T: Tracer>(&mut self, inferior: &mut Inferior<T>) -> Result<()> {
        if self.enabled {
            return Ok(());
        }
        let index = inferior.set_watchpoint(self.id, self.address, self.mode, self.size)?;
        self.hardware_register_index = Some(index);
        self.enabled = true;
        debug!(
            "Enabled watchpoint {} at {} ({}, {} bytes) in DR{}",
            self.id, self.address, self.mode, self.size, index
        );
        Ok(())
    }

    fn disable<T: Tracer>(&mut self, inferior: &mut Inferior<T>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(index) = self.hardware_register_index {
            inferior.clear_hardware_stoppoint(index)?;
        }
        self.hardware_register_index = None;
        self.enabled = false;
        debug!("Disabled watchpoint {} at {}", self.id, self.address);
        Ok(())
    }
}
