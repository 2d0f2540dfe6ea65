//! デバッガコマンド
//!
//! コマンド名とサブコマンド名は前方一致で解釈します（`c` は `continue`、`b s` は `breakpoint set`）。

use crate::errors::CommandError;
use crate::parse::{parse_address, parse_byte_list, parse_integer, parse_watchpoint_mode};
use crate::Result;
use tansa_target::{StoppointId, StoppointMode, VirtAddr};

/// `memory read` で読み取る既定のバイト数
pub const DEFAULT_MEMORY_READ_SIZE: usize = 32;

/// `disassemble` で表示する既定の命令数
pub const DEFAULT_DISASSEMBLY_COUNT: usize = 5;

/// `register read` の対象
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterSelection {
    /// 汎用レジスタ（orig_rax を除く）
    GeneralPurpose,
    /// すべてのレジスタ
    All,
    Named(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterCommand {
    Read(RegisterSelection),
    Write { name: String, value: String },
}

/// ブレークポイントとウォッチポイントで共通の操作
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoppointAction {
    Enable,
    Disable,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BreakpointCommand {
    List,
    Set { address: VirtAddr, hardware: bool },
    Modify { action: StoppointAction, id: StoppointId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchpointCommand {
    List,
    Set {
        address: VirtAddr,
        mode: StoppointMode,
        size: usize,
    },
    Modify { action: StoppointAction, id: StoppointId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryCommand {
    Read { address: VirtAddr, len: usize },
    Write { address: VirtAddr, data: Vec<u8> },
}

/// デバッガコマンド
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 実行継続
    Continue,
    /// 1命令のステップ実行
    Step,
    Register(RegisterCommand),
    Breakpoint(BreakpointCommand),
    Watchpoint(WatchpointCommand),
    Memory(MemoryCommand),
    /// 逆アセンブル（アドレス省略時は pc から）
    Disassemble {
        address: Option<VirtAddr>,
        count: usize,
    },
    /// ヘルプ表示（トピック指定可）
    Help(Option<String>),
    /// 終了
    Quit,
}

/// `input` が `of` の前方一致になっているかどうか
pub fn is_prefix(input: &str, of: &str) -> bool {
    !input.is_empty() && of.starts_with(input)
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Result<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        let Some((&name, args)) = parts.split_first() else {
            return Err(CommandError::UnknownCommand(String::new()).into());
        };

        if is_prefix(name, "continue") {
            Ok(Command::Continue)
        } else if is_prefix(name, "help") {
            Ok(Command::Help(args.first().map(|topic| topic.to_string())))
        } else if is_prefix(name, "register") {
            parse_register(args).map(Command::Register)
        } else if is_prefix(name, "breakpoint") {
            parse_breakpoint(args).map(Command::Breakpoint)
        } else if is_prefix(name, "step") {
            Ok(Command::Step)
        } else if is_prefix(name, "memory") {
            parse_memory(args).map(Command::Memory)
        } else if is_prefix(name, "disassemble") {
            parse_disassemble(args)
        } else if is_prefix(name, "watchpoint") {
            parse_watchpoint(args).map(Command::Watchpoint)
        } else if is_prefix(name, "quit") || is_prefix(name, "exit") {
            Ok(Command::Quit)
        } else {
            Err(CommandError::UnknownCommand(name.to_string()).into())
        }
    }
}

fn parse_register(args: &[&str]) -> Result<RegisterCommand> {
    match args {
        [sub] if is_prefix(sub, "read") => Ok(RegisterCommand::Read(RegisterSelection::GeneralPurpose)),
        [sub, "all"] if is_prefix(sub, "read") => Ok(RegisterCommand::Read(RegisterSelection::All)),
        [sub, name] if is_prefix(sub, "read") => {
            Ok(RegisterCommand::Read(RegisterSelection::Named(name.to_string())))
        }
        [sub, name, value] if is_prefix(sub, "write") => Ok(RegisterCommand::Write {
            name: name.to_string(),
            value: value.to_string(),
        }),
        _ => Err(CommandError::MissingArgument("register").into()),
    }
}

fn parse_id(text: &str) -> Result<StoppointId> {
    parse_integer::<StoppointId>(text, 10)
}

/// 操作名を前方一致で解釈する（`d` のように複数に一致する入力は受け付けない）
fn parse_action(sub: &str) -> Option<StoppointAction> {
    const ACTIONS: [(&str, StoppointAction); 3] = [
        ("enable", StoppointAction::Enable),
        ("disable", StoppointAction::Disable),
        ("delete", StoppointAction::Delete),
    ];

    let mut matches = ACTIONS.iter().filter(|(name, _)| is_prefix(sub, name));
    match (matches.next(), matches.next()) {
        (Some(&(_, action)), None) => Some(action),
        _ => None,
    }
}

fn parse_breakpoint(args: &[&str]) -> Result<BreakpointCommand> {
    match args {
        [sub] if is_prefix(sub, "list") => Ok(BreakpointCommand::List),
        [sub, address] if is_prefix(sub, "set") => Ok(BreakpointCommand::Set {
            address: parse_address(address)?,
            hardware: false,
        }),
        [sub, address, "-h"] if is_prefix(sub, "set") => Ok(BreakpointCommand::Set {
            address: parse_address(address)?,
            hardware: true,
        }),
        [sub, id] => match parse_action(sub) {
            Some(action) => Ok(BreakpointCommand::Modify {
                action,
                id: parse_id(id)?,
            }),
            None => Err(CommandError::MissingArgument("breakpoint").into()),
        },
        _ => Err(CommandError::MissingArgument("breakpoint").into()),
    }
}

fn parse_watchpoint(args: &[&str]) -> Result<WatchpointCommand> {
    match args {
        [sub] if is_prefix(sub, "list") => Ok(WatchpointCommand::List),
        [sub, address, mode, size] if is_prefix(sub, "set") => Ok(WatchpointCommand::Set {
            address: parse_address(address)?,
            mode: parse_watchpoint_mode(mode)?,
            size: parse_integer(size, 10)?,
        }),
        [sub, id] => match parse_action(sub) {
            Some(action) => Ok(WatchpointCommand::Modify {
                action,
                id: parse_id(id)?,
            }),
            None => Err(CommandError::MissingArgument("watchpoint").into()),
        },
        _ => Err(CommandError::MissingArgument("watchpoint").into()),
    }
}

fn parse_memory(args: &[&str]) -> Result<MemoryCommand> {
    match args {
        [sub, address] if is_prefix(sub, "read") => Ok(MemoryCommand::Read {
            address: parse_address(address)?,
            len: DEFAULT_MEMORY_READ_SIZE,
        }),
        [sub, address, len] if is_prefix(sub, "read") => Ok(MemoryCommand::Read {
            address: parse_address(address)?,
            len: parse_integer(len, 10)?,
        }),
        [sub, address, data] if is_prefix(sub, "write") => Ok(MemoryCommand::Write {
            address: parse_address(address)?,
            data: parse_byte_list(data)?,
        }),
        _ => Err(CommandError::MissingArgument("memory").into()),
    }
}

fn parse_disassemble(args: &[&str]) -> Result<Command> {
    let mut address = None;
    let mut count = DEFAULT_DISASSEMBLY_COUNT;

    let mut rest = args;
    while let [flag, value, tail @ ..] = rest {
        match *flag {
            "-a" => address = Some(parse_address(value)?),
            "-c" => count = parse_integer(value, 10)?,
            _ => return Err(CommandError::MissingArgument("disassemble").into()),
        }
        rest = tail;
    }
    if !rest.is_empty() {
        return Err(CommandError::MissingArgument("disassemble").into());
    }

    Ok(Command::Disassemble { address, count })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(Command::parse("continue").unwrap(), Command::Continue);
        assert_eq!(Command::parse("c").unwrap(), Command::Continue);
        assert_eq!(Command::parse("step").unwrap(), Command::Step);
        assert_eq!(Command::parse("s").unwrap(), Command::Step);
        assert_eq!(Command::parse("exit").unwrap(), Command::Quit);
        assert_eq!(Command::parse("q").unwrap(), Command::Quit);
        assert_eq!(Command::parse("help").unwrap(), Command::Help(None));
        assert_eq!(
            Command::parse("help memory").unwrap(),
            Command::Help(Some("memory".to_string()))
        );
        assert!(Command::parse("frobnicate").is_err());
        assert!(Command::parse("   ").is_err());
    }

    #[test]
    fn test_parse_register_commands() {
        assert_eq!(
            Command::parse("register read").unwrap(),
            Command::Register(RegisterCommand::Read(RegisterSelection::GeneralPurpose))
        );
        assert_eq!(
            Command::parse("reg r all").unwrap(),
            Command::Register(RegisterCommand::Read(RegisterSelection::All))
        );
        assert_eq!(
            Command::parse("register read rip").unwrap(),
            Command::Register(RegisterCommand::Read(RegisterSelection::Named("rip".to_string())))
        );
        assert_eq!(
            Command::parse("register write rsi 0xcafecafe").unwrap(),
            Command::Register(RegisterCommand::Write {
                name: "rsi".to_string(),
                value: "0xcafecafe".to_string(),
            })
        );
        assert!(Command::parse("register write rsi").is_err());
    }

    #[test]
    fn test_parse_breakpoint_commands() {
        assert_eq!(
            Command::parse("b list").unwrap(),
            Command::Breakpoint(BreakpointCommand::List)
        );
        assert_eq!(
            Command::parse("break set 0x401000 -h").unwrap(),
            Command::Breakpoint(BreakpointCommand::Set {
                address: VirtAddr::new(0x401000),
                hardware: true,
            })
        );
        assert_eq!(
            Command::parse("breakpoint disable 2").unwrap(),
            Command::Breakpoint(BreakpointCommand::Modify {
                action: StoppointAction::Disable,
                id: 2,
            })
        );
        assert_eq!(
            Command::parse("breakpoint del 3").unwrap(),
            Command::Breakpoint(BreakpointCommand::Modify {
                action: StoppointAction::Delete,
                id: 3,
            })
        );
        assert_eq!(
            Command::parse("b di 4").unwrap(),
            Command::Breakpoint(BreakpointCommand::Modify {
                action: StoppointAction::Disable,
                id: 4,
            })
        );
        // disable と delete のどちらとも取れる
        assert!(Command::parse("breakpoint d 1").is_err());
        assert!(Command::parse("watchpoint d 1").is_err());
        assert!(Command::parse("breakpoint set 0x401000 -x").is_err());
        assert!(Command::parse("breakpoint enable one").is_err());
    }

    #[test]
    fn test_parse_watchpoint_commands() {
        assert_eq!(
            Command::parse("watchpoint set 0x404018 rw 8").unwrap(),
            Command::Watchpoint(WatchpointCommand::Set {
                address: VirtAddr::new(0x404018),
                mode: StoppointMode::ReadWrite,
                size: 8,
            })
        );
        assert_eq!(
            Command::parse("w enable 1").unwrap(),
            Command::Watchpoint(WatchpointCommand::Modify {
                action: StoppointAction::Enable,
                id: 1,
            })
        );
        assert!(Command::parse("watchpoint set 0x404018 read 8").is_err());
    }

    #[test]
    fn test_parse_memory_and_disassemble() {
        assert_eq!(
            Command::parse("memory read 0x1000").unwrap(),
            Command::Memory(MemoryCommand::Read {
                address: VirtAddr::new(0x1000),
                len: DEFAULT_MEMORY_READ_SIZE,
            })
        );
        assert_eq!(
            Command::parse("mem write 0x1000 [0x90,0xc3]").unwrap(),
            Command::Memory(MemoryCommand::Write {
                address: VirtAddr::new(0x1000),
                data: vec![0x90, 0xc3],
            })
        );
        assert_eq!(
            Command::parse("disassemble").unwrap(),
            Command::Disassemble {
                address: None,
                count: DEFAULT_DISASSEMBLY_COUNT,
            }
        );
        assert_eq!(
            Command::parse("d -c 10 -a 0x401000").unwrap(),
            Command::Disassemble {
                address: Some(VirtAddr::new(0x401000)),
                count: 10,
            }
        );
        assert!(Command::parse("disassemble -c").is_err());
    }

    #[test]
    fn test_is_prefix() {
        assert!(is_prefix("cont", "continue"));
        assert!(!is_prefix("", "continue"));
        assert!(!is_prefix("continues", "continue"));
    }
}
