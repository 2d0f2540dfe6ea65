//! レジスタ記述子テーブル
//!
//! x86_64 Linux の `struct user` 内での各レジスタの位置・サイズ・形式を定義します。
//! オフセットは libc の構造体定義から `offset_of!` で計算します。

use crate::error::TargetError;
use crate::Result;
use nix::libc::{user, user_fpregs_struct, user_regs_struct};
use std::mem::offset_of;

/// レジスタの分類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterCategory {
    /// 64ビット汎用レジスタ
    Gpr,
    /// 汎用レジスタの一部を指す別名（eax, ax, ah, al など）
    SubGpr,
    /// 浮動小数点・ベクタレジスタ
    Fpr,
    /// デバッグレジスタ
    Debug,
}

/// レジスタ値のエンコード形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterFormat {
    Uint,
    Double,
    LongDouble,
    Vector,
}

/// 1つのレジスタの記述子
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterInfo {
    pub id: RegisterId,
    pub name: &'static str,
    /// DWARFレジスタ番号（公開されていない場合は -1）
    pub dwarf_id: i32,
    /// バイトサイズ
    pub size: usize,
    /// `struct user` 先頭からのバイトオフセット
    pub offset: usize,
    pub category: RegisterCategory,
    pub format: RegisterFormat,
}

macro_rules! gpr {
    ($field:ident) => {
        offset_of!(user, regs) + offset_of!(user_regs_struct, $field)
    };
}

macro_rules! fpr {
    ($field:ident) => {
        offset_of!(user, i387) + offset_of!(user_fpregs_struct, $field)
    };
}

macro_rules! dr {
    ($index:expr) => {
        offset_of!(user, u_debugreg) + $index * 8
    };
}

macro_rules! define_registers {
    ($( ($id:ident, $name:literal, $dwarf:expr, $size:expr, $offset:expr, $category:ident, $format:ident), )*) => {
        /// レジスタ識別子
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum RegisterId {
            $( $id, )*
        }

        /// 全レジスタの記述子（`RegisterId` の宣言順に並ぶ）
        pub static REGISTER_INFOS: &[RegisterInfo] = &[
            $(
                RegisterInfo {
                    id: RegisterId::$id,
                    name: $name,
                    dwarf_id: $dwarf,
                    size: $size,
                    offset: $offset,
                    category: RegisterCategory::$category,
                    format: RegisterFormat::$format,
                },
            )*
        ];
    };
}

define_registers! {
    // 64ビット汎用レジスタ
    (Rax, "rax", 0, 8, gpr!(rax), Gpr, Uint),
    (Rdx, "rdx", 1, 8, gpr!(rdx), Gpr, Uint),
    (Rcx, "rcx", 2, 8, gpr!(rcx), Gpr, Uint),
    (Rbx, "rbx", 3, 8, gpr!(rbx), Gpr, Uint),
    (Rsi, "rsi", 4, 8, gpr!(rsi), Gpr, Uint),
    (Rdi, "rdi", 5, 8, gpr!(rdi), Gpr, Uint),
    (Rbp, "rbp", 6, 8, gpr!(rbp), Gpr, Uint),
    (Rsp, "rsp", 7, 8, gpr!(rsp), Gpr, Uint),
    (R8, "r8", 8, 8, gpr!(r8), Gpr, Uint),
    (R9, "r9", 9, 8, gpr!(r9), Gpr, Uint),
    (R10, "r10", 10, 8, gpr!(r10), Gpr, Uint),
    (R11, "r11", 11, 8, gpr!(r11), Gpr, Uint),
    (R12, "r12", 12, 8, gpr!(r12), Gpr, Uint),
    (R13, "r13", 13, 8, gpr!(r13), Gpr, Uint),
    (R14, "r14", 14, 8, gpr!(r14), Gpr, Uint),
    (R15, "r15", 15, 8, gpr!(r15), Gpr, Uint),
    (Rip, "rip", 16, 8, gpr!(rip), Gpr, Uint),
    (Eflags, "eflags", 49, 8, gpr!(eflags), Gpr, Uint),
    (Cs, "cs", 51, 8, gpr!(cs), Gpr, Uint),
    (Fs, "fs", 54, 8, gpr!(fs), Gpr, Uint),
    (Gs, "gs", 55, 8, gpr!(gs), Gpr, Uint),
    (Ss, "ss", 52, 8, gpr!(ss), Gpr, Uint),
    (Ds, "ds", 53, 8, gpr!(ds), Gpr, Uint),
    (Es, "es", 50, 8, gpr!(es), Gpr, Uint),
    (OrigRax, "orig_rax", -1, 8, gpr!(orig_rax), Gpr, Uint),
    (FsBase, "fs_base", 58, 8, gpr!(fs_base), Gpr, Uint),
    (GsBase, "gs_base", 59, 8, gpr!(gs_base), Gpr, Uint),

    // 32ビットサブレジスタ
    (Eax, "eax", -1, 4, gpr!(rax), SubGpr, Uint),
    (Edx, "edx", -1, 4, gpr!(rdx), SubGpr, Uint),
    (Ecx, "ecx", -1, 4, gpr!(rcx), SubGpr, Uint),
    (Ebx, "ebx", -1, 4, gpr!(rbx), SubGpr, Uint),
    (Esi, "esi", -1, 4, gpr!(rsi), SubGpr, Uint),
    (Edi, "edi", -1, 4, gpr!(rdi), SubGpr, Uint),
    (Ebp, "ebp", -1, 4, gpr!(rbp), SubGpr, Uint),
    (Esp, "esp", -1, 4, gpr!(rsp), SubGpr, Uint),
    (R8d, "r8d", -1, 4, gpr!(r8), SubGpr, Uint),
    (R9d, "r9d", -1, 4, gpr!(r9), SubGpr, Uint),
    (R10d, "r10d", -1, 4, gpr!(r10), SubGpr, Uint),
    (R11d, "r11d", -1, 4, gpr!(r11), SubGpr, Uint),
    (R12d, "r12d", -1, 4, gpr!(r12), SubGpr, Uint),
    (R13d, "r13d", -1, 4, gpr!(r13), SubGpr, Uint),
    (R14d, "r14d", -1, 4, gpr!(r14), SubGpr, Uint),
    (R15d, "r15d", -1, 4, gpr!(r15), SubGpr, Uint),

    // 16ビットサブレジスタ
    (Ax, "ax", -1, 2, gpr!(rax), SubGpr, Uint),
    (Dx, "dx", -1, 2, gpr!(rdx), SubGpr, Uint),
    (Cx, "cx", -1, 2, gpr!(rcx), SubGpr, Uint),
    (Bx, "bx", -1, 2, gpr!(rbx), SubGpr, Uint),
    (Si, "si", -1, 2, gpr!(rsi), SubGpr, Uint),
    (Di, "di", -1, 2, gpr!(rdi), SubGpr, Uint),
    (Bp, "bp", -1, 2, gpr!(rbp), SubGpr, Uint),
    (Sp, "sp", -1, 2, gpr!(rsp), SubGpr, Uint),
    (R8w, "r8w", -1, 2, gpr!(r8), SubGpr, Uint),
    (R9w, "r9w", -1, 2, gpr!(r9), SubGpr, Uint),
    (R10w, "r10w", -1, 2, gpr!(r10), SubGpr, Uint),
    (R11w, "r11w", -1, 2, gpr!(r11), SubGpr, Uint),
    (R12w, "r12w", -1, 2, gpr!(r12), SubGpr, Uint),
    (R13w, "r13w", -1, 2, gpr!(r13), SubGpr, Uint),
    (R14w, "r14w", -1, 2, gpr!(r14), SubGpr, Uint),
    (R15w, "r15w", -1, 2, gpr!(r15), SubGpr, Uint),

    // 上位8ビットサブレジスタ
    (Ah, "ah", -1, 1, gpr!(rax) + 1, SubGpr, Uint),
    (Dh, "dh", -1, 1, gpr!(rdx) + 1, SubGpr, Uint),
    (Ch, "ch", -1, 1, gpr!(rcx) + 1, SubGpr, Uint),
    (Bh, "bh", -1, 1, gpr!(rbx) + 1, SubGpr, Uint),

    // 下位8ビットサブレジスタ
    (Al, "al", -1, 1, gpr!(rax), SubGpr, Uint),
    (Dl, "dl", -1, 1, gpr!(rdx), SubGpr, Uint),
    (Cl, "cl", -1, 1, gpr!(rcx), SubGpr, Uint),
    (Bl, "bl", -1, 1, gpr!(rbx), SubGpr, Uint),
    (Sil, "sil", -1, 1, gpr!(rsi), SubGpr, Uint),
    (Dil, "dil", -1, 1, gpr!(rdi), SubGpr, Uint),
    (Bpl, "bpl", -1, 1, gpr!(rbp), SubGpr, Uint),
    (Spl, "spl", -1, 1, gpr!(rsp), SubGpr, Uint),
    (R8b, "r8b", -1, 1, gpr!(r8), SubGpr, Uint),
    (R9b, "r9b", -1, 1, gpr!(r9), SubGpr, Uint),
    (R10b, "r10b", -1, 1, gpr!(r10), SubGpr, Uint),
    (R11b, "r11b", -1, 1, gpr!(r11), SubGpr, Uint),
    (R12b, "r12b", -1, 1, gpr!(r12), SubGpr, Uint),
    (R13b, "r13b", -1, 1, gpr!(r13), SubGpr, Uint),
    (R14b, "r14b", -1, 1, gpr!(r14), SubGpr, Uint),
    (R15b, "r15b", -1, 1, gpr!(r15), SubGpr, Uint),

    // x87/SSE制御レジスタ
    (Fcw, "fcw", 65, 2, fpr!(cwd), Fpr, Uint),
    (Fsw, "fsw", 66, 2, fpr!(swd), Fpr, Uint),
    (Ftw, "ftw", -1, 2, fpr!(ftw), Fpr, Uint),
    (Fop, "fop", -1, 2, fpr!(fop), Fpr, Uint),
    (Frip, "frip", -1, 8, fpr!(rip), Fpr, Uint),
    (Frdp, "frdp", -1, 8, fpr!(rdp), Fpr, Uint),
    (Mxcsr, "mxcsr", 64, 4, fpr!(mxcsr), Fpr, Uint),
    (Mxcsrmask, "mxcsrmask", -1, 4, fpr!(mxcr_mask), Fpr, Uint),

    // x87スタックレジスタ（80ビット、16バイト間隔）
    (St0, "st0", 33, 10, fpr!(st_space), Fpr, LongDouble),
    (St1, "st1", 34, 10, fpr!(st_space) + 1 * 16, Fpr, LongDouble),
    (St2, "st2", 35, 10, fpr!(st_space) + 2 * 16, Fpr, LongDouble),
    (St3, "st3", 36, 10, fpr!(st_space) + 3 * 16, Fpr, LongDouble),
    (St4, "st4", 37, 10, fpr!(st_space) + 4 * 16, Fpr, LongDouble),
    (St5, "st5", 38, 10, fpr!(st_space) + 5 * 16, Fpr, LongDouble),
    (St6, "st6", 39, 10, fpr!(st_space) + 6 * 16, Fpr, LongDouble),
    (St7, "st7", 40, 10, fpr!(st_space) + 7 * 16, Fpr, LongDouble),

    // MMXレジスタ（x87スタックと領域を共有）
    (Mm0, "mm0", 41, 8, fpr!(st_space), Fpr, Vector),
    (Mm1, "mm1", 42, 8, fpr!(st_space) + 1 * 16, Fpr, Vector),
    (Mm2, "mm2", 43, 8, fpr!(st_space) + 2 * 16, Fpr, Vector),
    (Mm3, "mm3", 44, 8, fpr!(st_space) + 3 * 16, Fpr, Vector),
    (Mm4, "mm4", 45, 8, fpr!(st_space) + 4 * 16, Fpr, Vector),
    (Mm5, "mm5", 46, 8, fpr!(st_space) + 5 * 16, Fpr, Vector),
    (Mm6, "mm6", 47, 8, fpr!(st_space) + 6 * 16, Fpr, Vector),
    (Mm7, "mm7", 48, 8, fpr!(st_space) + 7 * 16, Fpr, Vector),

    // SSEレジスタ
    (Xmm0, "xmm0", 17, 16, fpr!(xmm_space), Fpr, Vector),
    (Xmm1, "xmm1", 18, 16, fpr!(xmm_space) + 1 * 16, Fpr, Vector),
    (Xmm2, "xmm2", 19, 16, fpr!(xmm_space) + 2 * 16, Fpr, Vector),
    (Xmm3, "xmm3", 20, 16, fpr!(xmm_space) + 3 * 16, Fpr, Vector),
    (Xmm4, "xmm4", 21, 16, fpr!(xmm_space) + 4 * 16, Fpr, Vector),
    (Xmm5, "xmm5", 22, 16, fpr!(xmm_space) + 5 * 16, Fpr, Vector),
    (Xmm6, "xmm6", 23, 16, fpr!(xmm_space) + 6 * 16, Fpr, Vector),
    (Xmm7, "xmm7", 24, 16, fpr!(xmm_space) + 7 * 16, Fpr, Vector),
    (Xmm8, "xmm8", 25, 16, fpr!(xmm_space) + 8 * 16, Fpr, Vector),
    (Xmm9, "xmm9", 26, 16, fpr!(xmm_space) + 9 * 16, Fpr, Vector),
    (Xmm10, "xmm10", 27, 16, fpr!(xmm_space) + 10 * 16, Fpr, Vector),
    (Xmm11, "xmm11", 28, 16, fpr!(xmm_space) + 11 * 16, Fpr, Vector),
    (Xmm12, "xmm12", 29, 16, fpr!(xmm_space) + 12 * 16, Fpr, Vector),
    (Xmm13, "xmm13", 30, 16, fpr!(xmm_space) + 13 * 16, Fpr, Vector),
    (Xmm14, "xmm14", 31, 16, fpr!(xmm_space) + 14 * 16, Fpr, Vector),
    (Xmm15, "xmm15", 32, 16, fpr!(xmm_space) + 15 * 16, Fpr, Vector),

    // デバッグレジスタ
    (Dr0, "dr0", -1, 8, dr!(0), Debug, Uint),
    (Dr1, "dr1", -1, 8, dr!(1), Debug, Uint),
    (Dr2, "dr2", -1, 8, dr!(2), Debug, Uint),
    (Dr3, "dr3", -1, 8, dr!(3), Debug, Uint),
    (Dr4, "dr4", -1, 8, dr!(4), Debug, Uint),
    (Dr5, "dr5", -1, 8, dr!(5), Debug, Uint),
    (Dr6, "dr6", -1, 8, dr!(6), Debug, Uint),
    (Dr7, "dr7", -1, 8, dr!(7), Debug, Uint),
}

impl RegisterId {
    /// 記述子を取得する
    pub fn info(self) -> &'static RegisterInfo {
        &REGISTER_INFOS[self as usize]
    }

    /// デバッグレジスタ DR0〜DR7 の識別子を番号から取得する
    pub fn debug(index: usize) -> Result<Self> {
        let id = match index {
            0 => RegisterId::Dr0,
            1 => RegisterId::Dr1,
            2 => RegisterId::Dr2,
            3 => RegisterId::Dr3,
            4 => RegisterId::Dr4,
            5 => RegisterId::Dr5,
            6 => RegisterId::Dr6,
            7 => RegisterId::Dr7,
            _ => return Err(TargetError::InvalidDebugRegister(index).into()),
        };
        Ok(id)
    }
}

/// 識別子から記述子を取得する
pub fn register_info_by_id(id: RegisterId) -> &'static RegisterInfo {
    id.info()
}

/// 名前から記述子を取得する
pub fn register_info_by_name(name: &str) -> Result<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.name == name)
        .ok_or_else(|| TargetError::UnknownRegister(name.to_string()).into())
}

/// DWARFレジスタ番号から記述子を取得する
pub fn register_info_by_dwarf_id(dwarf_id: i32) -> Result<&'static RegisterInfo> {
    REGISTER_INFOS
        .iter()
        .find(|info| info.dwarf_id == dwarf_id && dwarf_id >= 0)
        .ok_or_else(|| TargetError::UnknownRegister(format!("dwarf #{}", dwarf_id)).into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::mem::size_of;

    #[test]
    fn test_table_order_matches_ids() {
        for (index, info) in REGISTER_INFOS.iter().enumerate() {
            assert_eq!(info.id as usize, index, "{} is out of order", info.name);
            assert_eq!(info.id.info().name, info.name);
        }
    }

    #[test]
    fn test_names_are_unique() {
        let names: HashSet<_> = REGISTER_INFOS.iter().map(|info| info.name).collect();
        assert_eq!(names.len(), REGISTER_INFOS.len());
    }

    #[test]
    fn test_offsets_fit_user_struct() {
        for info in REGISTER_INFOS {
            assert!(info.offset + info.size <= size_of::<user>(), "{}", info.name);
            assert!(matches!(info.size, 1 | 2 | 4 | 8 | 10 | 16), "{}", info.name);
        }
    }

    #[test]
    fn test_known_layout() {
        // struct user の先頭は user_regs_struct
        assert_eq!(RegisterId::R15.info().offset, 0);
        assert_eq!(RegisterId::Rax.info().offset, 80);
        assert_eq!(RegisterId::Ah.info().offset, 81);
        assert_eq!(RegisterId::Rip.info().offset, 128);
        assert_eq!(RegisterId::Fcw.info().offset, 224);
        assert_eq!(RegisterId::St0.info().offset, 256);
        assert_eq!(RegisterId::Mm1.info().offset, 272);
        assert_eq!(RegisterId::Xmm0.info().offset, 384);
        assert_eq!(RegisterId::Dr0.info().offset, 848);
        assert_eq!(RegisterId::Dr7.info().offset, 848 + 56);
    }

    #[test]
    fn test_lookups() {
        assert_eq!(register_info_by_name("rsi").unwrap().id, RegisterId::Rsi);
        assert_eq!(register_info_by_dwarf_id(4).unwrap().id, RegisterId::Rsi);
        assert_eq!(register_info_by_dwarf_id(17).unwrap().id, RegisterId::Xmm0);
        assert_eq!(register_info_by_id(RegisterId::Dr7).name, "dr7");
        assert!(register_info_by_name("zmm0").is_err());
        assert!(register_info_by_dwarf_id(-1).is_err());
        assert_eq!(RegisterId::debug(3).unwrap(), RegisterId::Dr3);
        assert!(RegisterId::debug(8).is_err());
    }
}
