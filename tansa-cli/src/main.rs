//! Tansa CLI - コマンドラインインターフェース
//!
//! x86-64 Linux 向けネイティブデバッガ tansa のREPLインターフェース

use anyhow::Result;
use clap::{Parser, Subcommand};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tansa_core::command::{
    BreakpointCommand, MemoryCommand, RegisterCommand, RegisterSelection, StoppointAction,
    WatchpointCommand, DEFAULT_DISASSEMBLY_COUNT,
};
use tansa_core::{Command, CommandError, Debugger, RegisterSet, StopReason, VirtAddr};
use tansa_target::{Stoppoint, StoppointId};
use tracing_subscriber::EnvFilter;

/// Tansa - x86-64 Linux debugger
#[derive(Parser)]
#[command(name = "tansa")]
#[command(version)]
#[command(about = "A small ptrace-based debugger for x86-64 Linux", long_about = None)]
struct Cli {
    /// Tracing filter (overrides RUST_LOG, e.g. "tansa_target=debug")
    #[arg(long, global = true)]
    log: Option<String>,

    #[command(subcommand)]
    command: DebugCommand,
}

#[derive(Subcommand)]
enum DebugCommand {
    /// Launch and debug an executable
    Run {
        /// Path to the executable binary
        program: String,

        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },

    /// Attach to an existing process
    Attach {
        /// Process ID to attach to
        #[arg(short, long)]
        pid: i32,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log.as_deref());

    let mut debugger = init_debugger(cli.command)?;
    run_repl(&mut debugger)?;

    Ok(())
}

/// ログ出力を初期化する（既定は warn、出力先は標準エラー）
fn init_tracing(filter: Option<&str>) {
    let filter = match filter {
        Some(filter) => EnvFilter::new(filter),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// デバッガを初期化してプロセスにアタッチまたは起動する
fn init_debugger(command: DebugCommand) -> Result<Debugger> {
    let mut debugger = Debugger::new();

    match command {
        DebugCommand::Run { program, args } => {
            debugger.launch(&program, &args)?;
            if let Some(process) = debugger.process() {
                println!("Launched process with PID {}", process.pid());
            }
        }
        DebugCommand::Attach { pid } => {
            debugger.attach(pid)?;
            println!("Attached to process {}", pid);
        }
    }

    Ok(debugger)
}

/// REPLループを実行する
///
/// 空行は直前のコマンドを繰り返します。
fn run_repl(debugger: &mut Debugger) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    let mut last_line: Option<String> = None;

    loop {
        let readline = rl.readline("(tansa) ");
        let line = match readline {
            Ok(line) => line.trim().to_string(),
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                eprintln!("Error: {:?}", err);
                break;
            }
        };

        let line = if line.is_empty() {
            match &last_line {
                Some(previous) => previous.clone(),
                None => continue,
            }
        } else {
            rl.add_history_entry(line.as_str())?;
            last_line = Some(line.clone());
            line
        };

        match handle_command(debugger, &line) {
            Ok(true) => break,
            Ok(false) => {}
            Err(e) => {
                eprintln!("{}", e);
                // 引数が足りない場合はそのコマンドのヘルプを出す
                if let Some(CommandError::MissingArgument(topic)) = e.downcast_ref::<CommandError>() {
                    print_help(Some(*topic));
                }
            }
        }
    }

    Ok(())
}

/// コマンドを実行する（終了するなら true）
fn handle_command(debugger: &mut Debugger, line: &str) -> Result<bool> {
    match Command::parse(line)? {
        Command::Continue => {
            let reason = debugger.continue_execution()?;
            print_stop_reason(debugger, reason)?;
        }
        Command::Step => {
            let reason = debugger.step()?;
            print_stop_reason(debugger, reason)?;
        }
        Command::Register(command) => handle_register(debugger, command)?,
        Command::Breakpoint(command) => handle_breakpoint(debugger, command)?,
        Command::Watchpoint(command) => handle_watchpoint(debugger, command)?,
        Command::Memory(command) => handle_memory(debugger, command)?,
        Command::Disassemble { address, count } => print_disassembly(debugger, address, count)?,
        Command::Help(topic) => print_help(topic.as_deref()),
        Command::Quit => return Ok(true),
    }
    Ok(false)
}

/// 停止理由を表示し、停止中なら pc からの命令を表示する
fn print_stop_reason(debugger: &Debugger, reason: StopReason) -> Result<()> {
    let pid = match debugger.process() {
        Some(process) => process.pid(),
        None => return Ok(()),
    };

    match reason {
        StopReason::Stopped(_) => {
            let pc = debugger.get_pc()?;
            println!("Process {} {} at {:#x}", pid, reason, pc);
            print_disassembly(debugger, Some(pc), DEFAULT_DISASSEMBLY_COUNT)?;
        }
        _ => println!("Process {} {}", pid, reason),
    }
    Ok(())
}

fn print_disassembly(debugger: &Debugger, address: Option<VirtAddr>, count: usize) -> Result<()> {
    for insn in debugger.disassemble(address, count)? {
        println!("{:#018x}: {}", insn.address, insn.text);
    }
    Ok(())
}

fn handle_register(debugger: &mut Debugger, command: RegisterCommand) -> Result<()> {
    match command {
        RegisterCommand::Read(RegisterSelection::Named(name)) => {
            let (_, value) = debugger.read_register(&name)?;
            println!("{}:\t{}", name, value);
        }
        RegisterCommand::Read(selection) => {
            let set = match selection {
                RegisterSelection::All => RegisterSet::All,
                _ => RegisterSet::GeneralPurpose,
            };
            for (info, value) in debugger.read_registers(set)? {
                println!("{:10}:\t{}", info.name, value);
            }
        }
        RegisterCommand::Write { name, value } => debugger.write_register(&name, &value)?,
    }
    Ok(())
}

fn handle_breakpoint(debugger: &mut Debugger, command: BreakpointCommand) -> Result<()> {
    match command {
        BreakpointCommand::List => {
            let sites = debugger.breakpoints()?;
            if sites.is_empty() {
                println!("No breakpoints set");
                return Ok(());
            }
            println!("Current breakpoints:");
            for site in sites {
                let kind = if site.is_hardware() { ", hardware" } else { "" };
                println!(
                    "{}: address = {:#x}, {}{}",
                    site.id(),
                    site.address(),
                    enabled_label(site.is_enabled()),
                    kind
                );
            }
        }
        BreakpointCommand::Set { address, hardware } => {
            let id = debugger.set_breakpoint(address, hardware)?;
            println!("Breakpoint {} set at {:#x}", id, address);
        }
        BreakpointCommand::Modify { action, id } => modify_breakpoint(debugger, action, id)?,
    }
    Ok(())
}

fn modify_breakpoint(debugger: &mut Debugger, action: StoppointAction, id: StoppointId) -> Result<()> {
    match action {
        StoppointAction::Enable => debugger.enable_breakpoint(id),
        StoppointAction::Disable => debugger.disable_breakpoint(id),
        StoppointAction::Delete => debugger.remove_breakpoint(id),
    }
}

fn handle_watchpoint(debugger: &mut Debugger, command: WatchpointCommand) -> Result<()> {
    match command {
        WatchpointCommand::List => {
            let watchpoints = debugger.watchpoints()?;
            if watchpoints.is_empty() {
                println!("No watchpoints set");
                return Ok(());
            }
            println!("Current watchpoints:");
            for watchpoint in watchpoints {
                println!(
                    "{}: address = {:#x}, mode = {}, size = {}, {}",
                    watchpoint.id(),
                    watchpoint.address(),
                    watchpoint.mode(),
                    watchpoint.size(),
                    enabled_label(watchpoint.is_enabled())
                );
            }
        }
        WatchpointCommand::Set { address, mode, size } => {
            let id = debugger.set_watchpoint(address, mode, size)?;
            println!("Watchpoint {} set at {:#x} ({}, {} bytes)", id, address, mode, size);
        }
        WatchpointCommand::Modify { action, id } => match action {
            StoppointAction::Enable => debugger.enable_watchpoint(id)?,
            StoppointAction::Disable => debugger.disable_watchpoint(id)?,
            StoppointAction::Delete => debugger.remove_watchpoint(id)?,
        },
    }
    Ok(())
}

fn handle_memory(debugger: &mut Debugger, command: MemoryCommand) -> Result<()> {
    match command {
        MemoryCommand::Read { address, len } => {
            let data = debugger.read_memory(address, len)?;
            for (row, chunk) in data.chunks(16).enumerate() {
                let bytes: Vec<String> = chunk.iter().map(|b| format!("{:02x}", b)).collect();
                println!("{:#016x}: {}", address + (row * 16) as i64, bytes.join(" "));
            }
        }
        MemoryCommand::Write { address, data } => debugger.write_memory(address, &data)?,
    }
    Ok(())
}

fn enabled_label(enabled: bool) -> &'static str {
    if enabled {
        "enabled"
    } else {
        "disabled"
    }
}

fn print_help(topic: Option<&str>) {
    let is = |name: &str| topic.is_some_and(|topic| tansa_core::command::is_prefix(topic, name));

    if topic.is_none() {
        println!("Available commands:");
        println!("  breakpoint  - Commands for operating on breakpoints");
        println!("  continue    - Resume the process");
        println!("  disassemble - Disassemble machine code to assembly");
        println!("  memory      - Commands for operating on memory");
        println!("  register    - Commands for operating on registers");
        println!("  step        - Step over a single instruction");
        println!("  watchpoint  - Commands for operating on watchpoints");
        println!("  exit        - Detach (or kill a launched process) and quit");
    } else if is("breakpoint") {
        println!("Available commands:");
        println!("  list");
        println!("  delete <id>");
        println!("  disable <id>");
        println!("  enable <id>");
        println!("  set <address>");
        println!("  set <address> -h");
    } else if is("register") {
        println!("Available commands:");
        println!("  read");
        println!("  read <register>");
        println!("  read all");
        println!("  write <register> <value>");
    } else if is("memory") {
        println!("Available commands:");
        println!("  read <address>");
        println!("  read <address> <number of bytes>");
        println!("  write <address> <bytes>");
    } else if is("disassemble") {
        println!("Available options:");
        println!("  -c <number of instructions>");
        println!("  -a <start address>");
    } else if is("watchpoint") {
        println!("Available commands:");
        println!("  list");
        println!("  delete <id>");
        println!("  disable <id>");
        println!("  enable <id>");
        println!("  set <address> <write|rw|execute> <size>");
    } else {
        println!("No help available on that");
    }
}
