//! ブレークポイントサイト

use crate::process::Inferior;
use crate::stoppoint::{Stoppoint, StoppointId};
use crate::tracer::Tracer;
use crate::types::VirtAddr;
use crate::Result;
use tracing::debug;

/// INT3命令のオペコード
pub const INT3_OPCODE: u8 = 0xCC;

/// 実行を止めるアドレス
///
/// ソフトウェア版は命令の先頭バイトをINT3で置き換え、
/// ハードウェア版はデバッグレジスタのスロットを1つ使います。
#[derive(Debug)]
pub struct BreakpointSite {
    id: StoppointId,
    address: VirtAddr,
    enabled: bool,
    saved_data: u8,
    is_hardware: bool,
    hardware_register_index: Option<usize>,
}

impl BreakpointSite {
    pub(crate) fn new(id: StoppointId, address: VirtAddr, is_hardware: bool) -> Self {
        Self {
            id,
            address,
            enabled: false,
            saved_data: 0,
            is_hardware,
            hardware_register_index: None,
        }
    }

    pub fn is_hardware(&self) -> bool {
        self.is_hardware
    }

    /// INT3で置き換える前の元のバイト
    ///
    /// ソフトウェア版が有効な間だけ意味を持ちます。
    pub fn saved_data(&self) -> u8 {
        self.saved_data
    }

    pub fn hardware_register_index(&self) -> Option<usize> {
        self.hardware_register_index
    }
}

impl Stoppoint for BreakpointSite {
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

        if self.is_hardware {
            let index = inferior.set_hardware_breakpoint(self.id, self.address)?;
            self.hardware_register_index = Some(index);
        } else {
            let word = inferior.peek_data(self.address)?;
            self.saved_data = (word & 0xff) as u8;
            let with_int3 = (word & !0xff) | INT3_OPCODE as u64;
            inferior.poke_data(self.address, with_int3)?;
        }

        debug!("Enabled breakpoint site {} at {}", self.id, self.address);
        self.enabled = true;
        Ok(())
    }

    fn disable<T: Tracer>(&mut self, inferior: &mut Inferior<T>) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }

        if self.is_hardware {
            if let Some(index) = self.hardware_register_index {
                inferior.clear_hardware_stoppoint(index)?;
            }
            self.hardware_register_index = None;
        } else {
            let word = inferior.peek_data(self.address)?;
            let restored = (word & !0xff) | self.saved_data as u64;
            inferior.poke_data(self.address, restored)?;
        }

        debug!("Disabled breakpoint site {} at {}", self.id, self.address);
        self.enabled = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::fake::FakeTracer;

    fn inferior() -> Inferior<FakeTracer> {
        let mut memory = vec![0u8; 0x40];
        memory[0x10..0x18].copy_from_slice(&[0x55, 0x48, 0x89, 0xe5, 0x90, 0x90, 0x90, 0xc3]);
        Inferior::new(FakeTracer::new(0x1000, memory), true)
    }

    #[test]
    fn test_software_enable_disable() {
        let mut inferior = inferior();
        let mut site = BreakpointSite::new(1, VirtAddr::new(0x1010), false);

        site.enable(&mut inferior).unwrap();
        assert!(site.is_enabled());
        assert_eq!(site.saved_data(), 0x55);
        assert_eq!(inferior.tracer().byte_at(0x1010), INT3_OPCODE);
        // 残りの7バイトは変わらない
        assert_eq!(inferior.tracer().byte_at(0x1011), 0x48);

        // 2回目の有効化は何もしない
        site.enable(&mut inferior).unwrap();
        assert_eq!(site.saved_data(), 0x55);

        site.disable(&mut inferior).unwrap();
        assert!(!site.is_enabled());
        assert_eq!(inferior.tracer().byte_at(0x1010), 0x55);
    }

    #[test]
    fn test_hardware_uses_debug_register() {
        let mut inferior = inferior();
        let mut site = BreakpointSite::new(1, VirtAddr::new(0x1010), true);

        site.enable(&mut inferior).unwrap();
        assert_eq!(site.hardware_register_index(), Some(0));
        // メモリは書き換えない
        assert_eq!(inferior.tracer().byte_at(0x1010), 0x55);
        assert_eq!(inferior.debug_register(0).unwrap(), 0x1010);
        assert_eq!(inferior.debug_register(7).unwrap() & 0b11, 0b01);

        site.disable(&mut inferior).unwrap();
        assert_eq!(site.hardware_register_index(), None);
        assert_eq!(inferior.debug_register(7).unwrap(), 0);
        assert_eq!(inferior.debug_register(0).unwrap(), 0);
    }

    #[test]
    fn test_enable_unmapped_address_fails() {
        let mut inferior = inferior();
        let mut site = BreakpointSite::new(1, VirtAddr::new(0x9000), false);
        assert!(site.enable(&mut inferior).is_err());
        assert!(!site.is_enabled());
    }
}
