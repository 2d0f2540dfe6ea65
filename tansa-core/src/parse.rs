//! パース関連のユーティリティ関数

use crate::errors::CommandError;
use crate::Result;
use tansa_target::{
    Extended80, RegisterFormat, RegisterInfo, RegisterValue, StoppointMode, VirtAddr,
};

/// 基数を指定してパースできる整数型
pub trait Integral: Sized {
    fn from_str_radix(s: &str, radix: u32) -> std::result::Result<Self, std::num::ParseIntError>;
}

macro_rules! impl_integral {
    ($($ty:ty),*) => {
        $(
            impl Integral for $ty {
                fn from_str_radix(s: &str, radix: u32) -> std::result::Result<Self, std::num::ParseIntError> {
                    <$ty>::from_str_radix(s, radix)
                }
            }
        )*
    };
}

impl_integral!(u8, u16, u32, u64, usize, i8, i16, i32, i64);

fn invalid(kind: &'static str, text: &str) -> anyhow::Error {
    CommandError::InvalidArgument {
        kind,
        text: text.to_string(),
    }
    .into()
}

/// 整数をパースする
///
/// 基数16のときは `0x` プレフィックスを省略できます。
pub fn parse_integer<T: Integral>(s: &str, radix: u32) -> Result<T> {
    let s = s.trim();
    let digits = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(rest) if radix == 16 => rest,
        _ => s,
    };
    // from_str_radix は先頭の '+' を受け付けるので明示的に弾く
    if digits.is_empty() || digits.starts_with('+') {
        return Err(invalid("integer", s));
    }
    T::from_str_radix(digits, radix).map_err(|_| invalid("integer", s))
}

/// アドレス文字列をパース
///
/// `0x` プレフィックス付きなら16進数、なければ10進数として解釈します。
///
/// # Examples
/// ```
/// use tansa_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap().addr(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap().addr(), 1234);
/// assert!(parse_address("10a0").is_err());
/// ```
pub fn parse_address(s: &str) -> Result<VirtAddr> {
    let s = s.trim();

    let value = if s.starts_with("0x") || s.starts_with("0X") {
        parse_integer::<u64>(s, 16)
    } else {
        parse_integer::<u64>(s, 10)
    };
    value
        .map(VirtAddr::new)
        .map_err(|_| invalid("address", s))
}

/// 浮動小数点数をパースする
pub fn parse_float(s: &str) -> Result<f64> {
    let s = s.trim();
    s.parse::<f64>().map_err(|_| invalid("floating point value", s))
}

fn parse_byte(s: &str) -> Option<u8> {
    // 各要素は "0xNN" の4文字
    let digits = s.strip_prefix("0x")?;
    if digits.len() != 2 {
        return None;
    }
    u8::from_str_radix(digits, 16).ok()
}

/// `[0x01,0x02,...]` 形式のバイト列をパースする（長さ任意）
pub fn parse_byte_list(s: &str) -> Result<Vec<u8>> {
    let s = s.trim();
    let inner = s
        .strip_prefix('[')
        .and_then(|rest| rest.strip_suffix(']'))
        .ok_or_else(|| invalid("byte list", s))?;

    if inner.is_empty() {
        return Ok(Vec::new());
    }
    inner
        .split(',')
        .map(|item| parse_byte(item).ok_or_else(|| invalid("byte list", s)))
        .collect()
}

/// `[0x01,0x02,...]` 形式のちょうど `N` バイトの列をパースする
pub fn parse_vector<const N: usize>(s: &str) -> Result<[u8; N]> {
    let bytes = parse_byte_list(s)?;
    bytes
        .try_into()
        .map_err(|_| invalid("vector", s.trim()))
}

/// レジスタの形式とサイズに従って値をパースする
///
/// 整数レジスタの値は16進数として解釈します。
pub fn parse_register_value(info: &RegisterInfo, text: &str) -> Result<RegisterValue> {
    let value = match (info.format, info.size) {
        (RegisterFormat::Uint, 1) => RegisterValue::U8(parse_integer(text, 16)?),
        (RegisterFormat::Uint, 2) => RegisterValue::U16(parse_integer(text, 16)?),
        (RegisterFormat::Uint, 4) => RegisterValue::U32(parse_integer(text, 16)?),
        (RegisterFormat::Uint, 8) => RegisterValue::U64(parse_integer(text, 16)?),
        (RegisterFormat::Double, _) => RegisterValue::F64(parse_float(text)?),
        (RegisterFormat::LongDouble, _) => {
            RegisterValue::LongDouble(Extended80::from_f64(parse_float(text)?))
        }
        (RegisterFormat::Vector, 8) => RegisterValue::Byte64(parse_vector::<8>(text)?),
        (RegisterFormat::Vector, 16) => RegisterValue::Byte128(parse_vector::<16>(text)?),
        _ => return Err(invalid("register value", text)),
    };
    Ok(value)
}

/// ウォッチポイントのモードをパースする（write / rw / execute）
pub fn parse_watchpoint_mode(s: &str) -> Result<StoppointMode> {
    match s.trim() {
        "write" => Ok(StoppointMode::Write),
        "rw" => Ok(StoppointMode::ReadWrite),
        "execute" => Ok(StoppointMode::Execute),
        other => Err(invalid("watchpoint mode", other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tansa_target::{register_info_by_name, RegisterId};

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap().addr(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap().addr(), 0x1234);
        assert_eq!(parse_address("0xabcd").unwrap().addr(), 0xabcd);
        assert_eq!(parse_address("0xABCD").unwrap().addr(), 0xabcd);
    }

    #[test]
    fn test_parse_address_dec() {
        assert_eq!(parse_address("1234").unwrap().addr(), 1234);
        assert_eq!(parse_address("9999").unwrap().addr(), 9999);
        // 0x なしの入力は常に10進数
        assert_eq!(parse_address("1000").unwrap().addr(), 1000);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("dead").is_err());
        assert!(parse_address("10a0").is_err());
        assert!(parse_address("0xghij").is_err());
        assert!(parse_address("").is_err());
    }

    #[test]
    fn test_parse_integer() {
        assert_eq!(parse_integer::<u8>("0xff", 16).unwrap(), 0xff);
        assert_eq!(parse_integer::<u8>("ff", 16).unwrap(), 0xff);
        assert!(parse_integer::<u8>("0x100", 16).is_err());
        assert_eq!(parse_integer::<usize>("42", 10).unwrap(), 42);
        assert!(parse_integer::<usize>("0x2a", 10).is_err());
        assert_eq!(parse_integer::<i32>("-7", 10).unwrap(), -7);
        assert!(parse_integer::<u32>("+7", 10).is_err());
        assert!(parse_integer::<u64>("0x", 16).is_err());
    }

    #[test]
    fn test_parse_vectors() {
        assert_eq!(
            parse_vector::<8>("[0x00,0x01,0x02,0x03,0x04,0x05,0x06,0xff]").unwrap(),
            [0, 1, 2, 3, 4, 5, 6, 0xff]
        );
        assert!(parse_vector::<8>("[0x00,0x01]").is_err());
        assert!(parse_vector::<2>("[0x00,0x1]").is_err());
        assert!(parse_vector::<2>("0x00,0x01").is_err());

        assert_eq!(parse_byte_list("[0xde,0xad]").unwrap(), vec![0xde, 0xad]);
        assert_eq!(parse_byte_list("[]").unwrap(), Vec::<u8>::new());
        assert!(parse_byte_list("[0xde,]").is_err());
        assert!(parse_byte_list("[0xde,0xad]x").is_err());
    }

    #[test]
    fn test_parse_register_value_by_format() {
        let rsi = register_info_by_name("rsi").unwrap();
        assert_eq!(parse_register_value(rsi, "0xcafecafe").unwrap(), RegisterValue::U64(0xcafecafe));

        let al = RegisterId::Al.info();
        assert_eq!(parse_register_value(al, "7f").unwrap(), RegisterValue::U8(0x7f));
        assert!(parse_register_value(al, "0x100").is_err());

        let st0 = RegisterId::St0.info();
        assert_eq!(
            parse_register_value(st0, "42.24").unwrap(),
            RegisterValue::LongDouble(Extended80::from_f64(42.24))
        );

        let mm0 = RegisterId::Mm0.info();
        assert_eq!(
            parse_register_value(mm0, "[0xba,0xd0,0xba,0xd0,0xba,0xd0,0xba,0xd0]").unwrap(),
            RegisterValue::Byte64([0xba, 0xd0, 0xba, 0xd0, 0xba, 0xd0, 0xba, 0xd0])
        );

        let xmm0 = RegisterId::Xmm0.info();
        assert!(parse_register_value(xmm0, "42.42").is_err());
    }

    #[test]
    fn test_parse_watchpoint_mode() {
        assert_eq!(parse_watchpoint_mode("write").unwrap(), StoppointMode::Write);
        assert_eq!(parse_watchpoint_mode("rw").unwrap(), StoppointMode::ReadWrite);
        assert_eq!(parse_watchpoint_mode("execute").unwrap(), StoppointMode::Execute);
        assert!(parse_watchpoint_mode("read").is_err());
    }
}
