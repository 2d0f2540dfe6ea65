//! 何もせずに終了するターゲット

fn main() {}
