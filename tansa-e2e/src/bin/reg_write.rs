//! レジスタ書き込みの確認用ターゲット
//!
//! INT3 で止まるたびに、デバッガが書き換えたレジスタの値を標準出力に書き出します。

use std::arch::asm;
use std::io::Write;

fn main() {
    let mut stdout = std::io::stdout();

    let rsi: u64;
    // SAFETY: int3 でデバッガに停止を知らせ、その後の rsi を読むだけ
    unsafe { asm!("int3", out("rsi") rsi) };
    print!("{:#x}", rsi);
    let _ = stdout.flush();

    let xmm0: f64;
    // SAFETY: 同上（xmm0 の下位64ビットを double として読む）
    unsafe { asm!("int3", out("xmm0") xmm0) };
    print!("{}", xmm0);
    let _ = stdout.flush();
}
