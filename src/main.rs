//! Wang 2200 core emulator binary: headless runner and MCP diagnostic
//! server. No windowing or rendering is built here; the crate's non-goals
//! exclude a GUI entirely.

use std::path::{Path, PathBuf};
use std::process;

use wang2200::config::{Config, MicrocodeVariant};
use wang2200::system::System;
use wang2200::trace::Trace;

#[cfg(feature = "mcp")]
use wang2200::mcp::McpServer;

struct CliArgs {
    microcode_path: Option<PathBuf>,
    rom_path: Option<PathBuf>,
    ram_kb: u16,
    micro_ops: u64,
    mcp: bool,
    trace: Trace,
}

fn parse_args() -> CliArgs {
    let args: Vec<String> = std::env::args().collect();
    let mut cli = CliArgs {
        microcode_path: None,
        rom_path: None,
        ram_kb: 32,
        micro_ops: 1_000_000,
        mcp: false,
        trace: Trace::none(),
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--microcode" => {
                i += 1;
                cli.microcode_path = args.get(i).map(PathBuf::from);
            }
            "--keyboard-rom" => {
                i += 1;
                cli.rom_path = args.get(i).map(PathBuf::from);
            }
            "--ram-kb" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.ram_kb = s.parse().unwrap_or(32);
                }
            }
            "--micro-ops" => {
                i += 1;
                if let Some(s) = args.get(i) {
                    cli.micro_ops = s.parse().unwrap_or(1_000_000);
                }
            }
            "--mcp" => {
                cli.mcp = true;
            }
            "--trace" => {
                cli.trace = Trace::all();
            }
            "--help" | "-h" => {
                eprintln!("Usage: wang2200 [OPTIONS]");
                eprintln!();
                eprintln!("Options:");
                eprintln!("  --microcode <file>     Microcode image (4-byte LE words)");
                eprintln!("  --keyboard-rom <file>  Keyboard/boot ROM image");
                eprintln!("  --ram-kb <n>           RAM size in KB [default: 32]");
                eprintln!("  --micro-ops <n>        Micro-ops to run headless [default: 1000000]");
                eprintln!("  --mcp                  Run as an MCP server (JSON-RPC over stdio)");
                eprintln!("  --trace                Enable all subsystem trace output");
                process::exit(0);
            }
            other => {
                eprintln!("Unknown argument: {other}");
                process::exit(1);
            }
        }
        i += 1;
    }

    cli
}

/// Unpack a raw byte image into 20-bit microwords, 4 bytes (little-endian,
/// low 20 bits significant) per word.
fn unpack_microcode(bytes: &[u8]) -> Vec<u32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let mut buf = [0u8; 4];
            buf[..chunk.len()].copy_from_slice(chunk);
            u32::from_le_bytes(buf) & 0x000F_FFFF
        })
        .collect()
}

fn load_file(path: &Path, name: &str) -> Vec<u8> {
    match std::fs::read(path) {
        Ok(data) => data,
        Err(e) => {
            eprintln!("Cannot read {name} at {}: {e}", path.display());
            process::exit(1);
        }
    }
}

fn make_config(cli: &CliArgs) -> Config {
    let microcode_words = cli
        .microcode_path
        .as_deref()
        .map(|p| unpack_microcode(&load_file(p, "microcode image")))
        .unwrap_or_default();
    let keyboard_rom = cli
        .rom_path
        .as_deref()
        .map(|p| load_file(p, "keyboard ROM"))
        .unwrap_or_default();

    Config {
        ram_kb: cli.ram_kb,
        microcode_variant: MicrocodeVariant::Wang2200T,
        microcode_words,
        keyboard_rom,
        trace: cli.trace,
    }
}

fn run_headless(cli: &CliArgs) {
    let config = make_config(cli);
    let mut system = match System::new(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            process::exit(1);
        }
    };

    match system.run(cli.micro_ops) {
        Ok(n) => eprintln!("ran {n} micro-ops"),
        Err(fault) => {
            eprintln!(
                "halted after {} micro-ops: {fault}",
                system.micro_ops_executed()
            );
            process::exit(1);
        }
    }
}

#[cfg(feature = "mcp")]
fn run_mcp() {
    let mut server = McpServer::new();
    server.run();
}

#[cfg(not(feature = "mcp"))]
fn run_mcp() {
    eprintln!("This binary was built without the `mcp` feature.");
    process::exit(1);
}

fn main() {
    let cli = parse_args();

    if cli.mcp {
        run_mcp();
        return;
    }

    run_headless(&cli);
}
