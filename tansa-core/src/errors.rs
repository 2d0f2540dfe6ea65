//! エラー型とエラーメッセージ定数

/// プロセスに接続されていない場合のエラーメッセージ
pub const ERR_NOT_ATTACHED: &str = "Not attached to a process";

/// コマンド入力の解釈に失敗した
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    /// 引数が足りない（ヘルプの対象となるコマンド名を持つ）
    #[error("Missing arguments for {0}")]
    MissingArgument(&'static str),

    #[error("Invalid {kind}: '{text}'")]
    InvalidArgument { kind: &'static str, text: String },
}
