//! レジスタストア
//!
//! プロセスの `struct user` イメージを1つ保持し、記述子に従って値を読み書きします。
//! カーネルへの書き戻しは [`KernelWrite`] として呼び出し側（プロセス）に渡します。

use crate::error::TargetError;
use crate::register_info::{RegisterCategory, RegisterFormat, RegisterId, RegisterInfo};
use crate::types::{Byte128, Byte64};
use crate::Result;
use nix::libc::{user, user_fpregs_struct, user_regs_struct};
use std::fmt;
use std::mem::{offset_of, size_of};

/// x87 拡張倍精度浮動小数点数（80ビット）
///
/// 下位8バイトが明示的な整数ビットを含む仮数部、上位2バイトが符号と指数部です。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extended80([u8; 10]);

const F80_EXPONENT_BIAS: i32 = 16383;
const F64_EXPONENT_BIAS: i32 = 1023;

impl Extended80 {
    pub fn from_bytes(bytes: [u8; 10]) -> Self {
        Self(bytes)
    }

    pub fn to_bytes(self) -> [u8; 10] {
        self.0
    }

    /// f64 を拡張倍精度に変換する（常に正確）
    pub fn from_f64(value: f64) -> Self {
        let bits = value.to_bits();
        let sign = ((bits >> 63) as u16) << 15;
        let exponent = ((bits >> 52) & 0x7ff) as i32;
        let fraction = bits & ((1u64 << 52) - 1);

        let (exponent, mantissa) = match (exponent, fraction) {
            (0, 0) => (0, 0),
            (0x7ff, _) => (0x7fff, (1u64 << 63) | (fraction << 11)),
            (0, _) => {
                // 非正規化数は整数ビットが立つまで正規化する
                let shift = fraction.leading_zeros();
                let unbiased = -1011 - shift as i32;
                ((unbiased + F80_EXPONENT_BIAS) as u16, fraction << shift)
            }
            _ => {
                let unbiased = exponent - F64_EXPONENT_BIAS;
                (
                    (unbiased + F80_EXPONENT_BIAS) as u16,
                    (1u64 << 63) | (fraction << 11),
                )
            }
        };

        let mut bytes = [0u8; 10];
        bytes[..8].copy_from_slice(&mantissa.to_le_bytes());
        bytes[8..].copy_from_slice(&(sign | exponent).to_le_bytes());
        Self(bytes)
    }

    /// f64 に丸めて変換する
    pub fn to_f64(self) -> f64 {
        let mut mantissa_bytes = [0u8; 8];
        mantissa_bytes.copy_from_slice(&self.0[..8]);
        let mantissa = u64::from_le_bytes(mantissa_bytes);
        let sign_exponent = u16::from_le_bytes([self.0[8], self.0[9]]);
        let negative = sign_exponent & 0x8000 != 0;
        let exponent = (sign_exponent & 0x7fff) as i32;

        let magnitude = if exponent == 0x7fff {
            if mantissa << 1 == 0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        } else if mantissa == 0 {
            0.0
        } else {
            let exponent = if exponent == 0 { 1 } else { exponent };
            scale_by_power_of_two(mantissa as f64, exponent - F80_EXPONENT_BIAS - 63)
        };

        if negative {
            -magnitude
        } else {
            magnitude
        }
    }
}

/// `value * 2^exponent` をオーバーフローさせずに計算する
fn scale_by_power_of_two(mut value: f64, mut exponent: i32) -> f64 {
    while exponent > 1000 {
        value *= 2f64.powi(1000);
        exponent -= 1000;
    }
    while exponent < -1000 {
        value *= 2f64.powi(-1000);
        exponent += 1000;
    }
    value * 2f64.powi(exponent)
}

impl fmt::Display for Extended80 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_f64())
    }
}

/// レジスタ値
///
/// 値は読み書きに使った記述子と組み合わせて初めて意味を持ちます。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RegisterValue {
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    LongDouble(Extended80),
    Byte64(Byte64),
    Byte128(Byte128),
}

impl RegisterValue {
    /// 値のバイトサイズ
    pub fn size(&self) -> usize {
        match self {
            RegisterValue::U8(_) | RegisterValue::I8(_) => 1,
            RegisterValue::U16(_) | RegisterValue::I16(_) => 2,
            RegisterValue::U32(_) | RegisterValue::I32(_) | RegisterValue::F32(_) => 4,
            RegisterValue::U64(_)
            | RegisterValue::I64(_)
            | RegisterValue::F64(_)
            | RegisterValue::Byte64(_) => 8,
            RegisterValue::LongDouble(_) => 10,
            RegisterValue::Byte128(_) => 16,
        }
    }

    /// リトルエンディアンの生バイト列
    fn raw_bytes(&self) -> Vec<u8> {
        match *self {
            RegisterValue::U8(v) => v.to_le_bytes().to_vec(),
            RegisterValue::U16(v) => v.to_le_bytes().to_vec(),
            RegisterValue::U32(v) => v.to_le_bytes().to_vec(),
            RegisterValue::U64(v) => v.to_le_bytes().to_vec(),
            RegisterValue::I8(v) => v.to_le_bytes().to_vec(),
            RegisterValue::I16(v) => v.to_le_bytes().to_vec(),
            RegisterValue::I32(v) => v.to_le_bytes().to_vec(),
            RegisterValue::I64(v) => v.to_le_bytes().to_vec(),
            RegisterValue::F32(v) => v.to_le_bytes().to_vec(),
            RegisterValue::F64(v) => v.to_le_bytes().to_vec(),
            RegisterValue::LongDouble(v) => v.to_bytes().to_vec(),
            RegisterValue::Byte64(v) => v.to_vec(),
            RegisterValue::Byte128(v) => v.to_vec(),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match *self {
            RegisterValue::F32(v) => Some(v as f64),
            RegisterValue::F64(v) => Some(v),
            RegisterValue::LongDouble(v) => Some(v.to_f64()),
            _ => None,
        }
    }

    fn as_i64(&self) -> Option<i64> {
        match *self {
            RegisterValue::I8(v) => Some(v as i64),
            RegisterValue::I16(v) => Some(v as i64),
            RegisterValue::I32(v) => Some(v as i64),
            RegisterValue::I64(v) => Some(v),
            _ => None,
        }
    }
}

impl fmt::Display for RegisterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self.size() * 2 + 2;
        match *self {
            RegisterValue::U8(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::U16(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::U32(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::U64(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::I8(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::I16(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::I32(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::I64(v) => write!(f, "{:#0width$x}", v),
            RegisterValue::F32(v) => write!(f, "{}", v),
            RegisterValue::F64(v) => write!(f, "{}", v),
            RegisterValue::LongDouble(v) => write!(f, "{}", v),
            RegisterValue::Byte64(ref v) => write_byte_list(f, v),
            RegisterValue::Byte128(ref v) => write_byte_list(f, v),
        }
    }
}

fn write_byte_list(f: &mut fmt::Formatter<'_>, bytes: &[u8]) -> fmt::Result {
    let items: Vec<String> = bytes.iter().map(|b| format!("{:#04x}", b)).collect();
    write!(f, "[{}]", items.join(","))
}

macro_rules! impl_register_value_conversions {
    ($( $ty:ty => $variant:ident ),* $(,)?) => {
        $(
            impl From<$ty> for RegisterValue {
                fn from(value: $ty) -> Self {
                    RegisterValue::$variant(value)
                }
            }

            impl TryFrom<RegisterValue> for $ty {
                type Error = TargetError;

                fn try_from(value: RegisterValue) -> std::result::Result<Self, Self::Error> {
                    match value {
                        RegisterValue::$variant(v) => Ok(v),
                        other => Err(TargetError::UnexpectedRegisterValue(format!("{:?}", other))),
                    }
                }
            }
        )*
    };
}

impl_register_value_conversions! {
    u8 => U8,
    u16 => U16,
    u32 => U32,
    u64 => U64,
    i8 => I8,
    i16 => I16,
    i32 => I32,
    i64 => I64,
    f32 => F32,
    f64 => F64,
    Extended80 => LongDouble,
    Byte64 => Byte64,
    Byte128 => Byte128,
}

/// 記述子に従って生バイト列をデコードする
pub fn decode(info: &RegisterInfo, bytes: &[u8]) -> Result<RegisterValue> {
    let bytes = &bytes[..info.size];
    let value = match info.format {
        RegisterFormat::Uint => match info.size {
            1 => RegisterValue::U8(bytes[0]),
            2 => RegisterValue::U16(u16::from_le_bytes(bytes.try_into()?)),
            4 => RegisterValue::U32(u32::from_le_bytes(bytes.try_into()?)),
            8 => RegisterValue::U64(u64::from_le_bytes(bytes.try_into()?)),
            size => {
                return Err(TargetError::UnexpectedRegisterSize {
                    register: info.name,
                    size,
                }
                .into())
            }
        },
        RegisterFormat::Double => RegisterValue::F64(f64::from_le_bytes(bytes.try_into()?)),
        RegisterFormat::LongDouble => {
            RegisterValue::LongDouble(Extended80::from_bytes(bytes.try_into()?))
        }
        RegisterFormat::Vector if info.size == 8 => RegisterValue::Byte64(bytes.try_into()?),
        RegisterFormat::Vector => RegisterValue::Byte128(bytes.try_into()?),
    };
    Ok(value)
}

/// 値を記述子のサイズと形式にちょうど合わせたバイト列へエンコードする
///
/// 浮動小数点値は double / long double スロットの精度に変換し、
/// 符号付き整数は符号拡張してから目的の幅で解釈し直します。
/// それ以外はゼロ拡張した生バイトです。
pub fn encode(info: &RegisterInfo, value: RegisterValue) -> Result<Vec<u8>> {
    if value.size() > info.size {
        return Err(TargetError::RegisterSizeMismatch {
            register: info.name,
            register_size: info.size,
            value_size: value.size(),
        }
        .into());
    }

    let wide = match (info.format, value.as_f64(), value.as_i64()) {
        // 80ビット値は f64 を経由させない（仮数部の下位ビットと NaN のペイロードを保つ）
        (RegisterFormat::LongDouble, _, _) if matches!(value, RegisterValue::LongDouble(_)) => {
            value.raw_bytes()
        }
        (RegisterFormat::Double, Some(v), _) => v.to_le_bytes().to_vec(),
        (RegisterFormat::LongDouble, Some(v), _) => Extended80::from_f64(v).to_bytes().to_vec(),
        (RegisterFormat::Uint, _, Some(v)) => v.to_le_bytes().to_vec(),
        _ => value.raw_bytes(),
    };

    let mut bytes = vec![0u8; info.size];
    let len = wide.len().min(info.size);
    bytes[..len].copy_from_slice(&wide[..len]);
    Ok(bytes)
}

/// カーネルへ書き戻す内容
#[derive(Clone, Copy)]
pub(crate) enum KernelWrite {
    /// PTRACE_SETFPREGS で浮動小数点レジスタ全体を書き込む
    Fprs(user_fpregs_struct),
    /// PTRACE_POKEUSER で8バイト境界のワードを書き込む
    User { offset: usize, word: u64 },
}

/// まだカーネルへ反映していないレジスタ書き込み
pub(crate) struct StagedWrite {
    image: Vec<u8>,
    pub(crate) kernel_write: KernelWrite,
}

/// カーネルとの間でバイト列として受け渡しできる構造体
///
/// # Safety
/// 実装する型はパディングを持たないプレーンなデータでなければならない。
unsafe trait KernelImage: Copy {}

unsafe impl KernelImage for user_regs_struct {}
unsafe impl KernelImage for user_fpregs_struct {}

fn image_bytes<T: KernelImage>(value: &T) -> &[u8] {
    // SAFETY: KernelImage の実装型はパディングのない POD
    unsafe { std::slice::from_raw_parts(value as *const T as *const u8, size_of::<T>()) }
}

fn image_from_bytes<T: KernelImage>(bytes: &[u8]) -> T {
    assert!(bytes.len() >= size_of::<T>());
    // SAFETY: 長さは確認済みで、KernelImage の実装型は任意のビットパターンを許す
    unsafe { std::ptr::read_unaligned(bytes.as_ptr() as *const T) }
}

/// プロセスのレジスタイメージ
#[derive(Debug)]
pub struct Registers {
    image: Vec<u8>,
}

impl Registers {
    pub(crate) fn new() -> Self {
        Self {
            image: vec![0; size_of::<user>()],
        }
    }

    /// 記述子が指すレジスタを読み取る
    pub fn read(&self, info: &RegisterInfo) -> Result<RegisterValue> {
        decode(info, &self.image[info.offset..info.offset + info.size])
    }

    /// 識別子が指すレジスタを読み取る
    pub fn read_by_id(&self, id: RegisterId) -> Result<RegisterValue> {
        self.read(id.info())
    }

    /// 識別子が指すレジスタを特定の型として読み取る
    pub fn read_by_id_as<T>(&self, id: RegisterId) -> Result<T>
    where
        T: TryFrom<RegisterValue, Error = TargetError>,
    {
        Ok(T::try_from(self.read_by_id(id)?)?)
    }

    /// 書き込み後のイメージとカーネルへの書き戻し内容を用意する
    ///
    /// イメージ自体は [`Registers::commit`] を呼ぶまで変更されません。
    pub(crate) fn stage_write(&self, info: &RegisterInfo, value: RegisterValue) -> Result<StagedWrite> {
        let bytes = encode(info, value)?;
        let mut image = self.image.clone();
        image[info.offset..info.offset + info.size].copy_from_slice(&bytes);

        let kernel_write = if info.category == RegisterCategory::Fpr {
            let start = offset_of!(user, i387);
            KernelWrite::Fprs(image_from_bytes(&image[start..start + size_of::<user_fpregs_struct>()]))
        } else {
            // POKEUSER は8バイト境界のワードしか受け付けない（ah などのため）
            let offset = info.offset & !0b111;
            let word = u64::from_le_bytes(image[offset..offset + 8].try_into()?);
            KernelWrite::User { offset, word }
        };

        Ok(StagedWrite {
            image,
            kernel_write,
        })
    }

    pub(crate) fn commit(&mut self, staged: StagedWrite) {
        self.image = staged.image;
    }

    pub(crate) fn load_gprs(&mut self, gprs: &user_regs_struct) {
        let start = offset_of!(user, regs);
        self.image[start..start + size_of::<user_regs_struct>()].copy_from_slice(image_bytes(gprs));
    }

    pub(crate) fn load_fprs(&mut self, fprs: &user_fpregs_struct) {
        let start = offset_of!(user, i387);
        self.image[start..start + size_of::<user_fpregs_struct>()].copy_from_slice(image_bytes(fprs));
    }

    pub(crate) fn load_debug_register(&mut self, index: usize, value: u64) -> Result<()> {
        let offset = RegisterId::debug(index)?.info().offset;
        self.image[offset..offset + 8].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn gprs_from_image(image: &[u8]) -> user_regs_struct {
    let start = offset_of!(user, regs);
    image_from_bytes(&image[start..start + size_of::<user_regs_struct>()])
}

#[cfg(test)]
pub(crate) fn fprs_from_image(image: &[u8]) -> user_fpregs_struct {
    let start = offset_of!(user, i387);
    image_from_bytes(&image[start..start + size_of::<user_fpregs_struct>()])
}

#[cfg(test)]
pub(crate) fn fprs_to_bytes(fprs: &user_fpregs_struct) -> &[u8] {
    image_bytes(fprs)
}
