//! Diagnostic server: JSON-RPC 2.0 over stdin/stdout exposing
//! [`crate::observable::Observable::query`] plus a handful of control
//! verbs, mirroring the shape (not the method set) of
//! `examples/emu198x-emu198x/crates/emu-c64/src/mcp.rs`. Ambient tooling,
//! gated behind the `mcp` feature; never a dependency of the emulation core
//! itself.

use std::io::{self, BufRead, Write};

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::config::{Config, MicrocodeVariant};
use crate::disk::NUM_DRIVES;
use crate::keyboard::KeyEvent;
use crate::observable::Observable;
use crate::system::System;
use crate::trace::Trace;
use crate::vdisk::Vdisk;

#[derive(Deserialize)]
struct RpcRequest {
    jsonrpc: String,
    method: String,
    #[serde(default)]
    params: JsonValue,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcResponse {
    jsonrpc: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<RpcError>,
    id: JsonValue,
}

#[derive(Serialize)]
struct RpcError {
    code: i32,
    message: String,
}

impl RpcResponse {
    fn success(id: JsonValue, result: JsonValue) -> Self {
        RpcResponse {
            jsonrpc: "2.0",
            result: Some(result),
            error: None,
            id,
        }
    }

    fn error(id: JsonValue, code: i32, message: String) -> Self {
        RpcResponse {
            jsonrpc: "2.0",
            result: None,
            error: Some(RpcError { code, message }),
            id,
        }
    }
}

/// Diagnostic server wrapping a headless [`System`] instance, constructed
/// on demand by the `boot` method.
pub struct McpServer {
    system: Option<System>,
}

impl McpServer {
    #[must_use]
    pub fn new() -> Self {
        McpServer { system: None }
    }

    /// Run the server loop: read JSON-RPC from stdin, write responses to
    /// stdout, one line per request.
    pub fn run(&mut self) {
        let stdin = io::stdin();
        let stdout = io::stdout();
        let mut stdout = stdout.lock();

        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            let request: RpcRequest = match serde_json::from_str(line) {
                Ok(r) => r,
                Err(e) => {
                    let resp =
                        RpcResponse::error(JsonValue::Null, -32700, format!("Parse error: {e}"));
                    let _ = writeln!(stdout, "{}", serde_json::to_string(&resp).unwrap_or_default());
                    let _ = stdout.flush();
                    continue;
                }
            };

            if request.jsonrpc != "2.0" {
                let resp = RpcResponse::error(
                    request.id,
                    -32600,
                    "Invalid JSON-RPC version".to_string(),
                );
                let _ = writeln!(stdout, "{}", serde_json::to_string(&resp).unwrap_or_default());
                let _ = stdout.flush();
                continue;
            }

            let response = self.dispatch(&request.method, &request.params, request.id.clone());
            let _ = writeln!(stdout, "{}", serde_json::to_string(&response).unwrap_or_default());
            let _ = stdout.flush();
        }
    }

    fn dispatch(&mut self, method: &str, params: &JsonValue, id: JsonValue) -> RpcResponse {
        match method {
            "boot" => self.handle_boot(params, id),
            "reset" => self.handle_reset(params, id),
            "step" => self.handle_step(params, id),
            "run" => self.handle_run(params, id),
            "query" => self.handle_query(params, id),
            "insert_disk" => self.handle_insert_disk(params, id),
            "eject_disk" => self.handle_eject_disk(params, id),
            "push_key" => self.handle_push_key(params, id),
            "drain_terminal_output" => self.handle_drain_terminal_output(id),
            _ => RpcResponse::error(id, -32601, format!("Unknown method: {method}")),
        }
    }

    fn require_system(&mut self, id: &JsonValue) -> Result<&mut System, RpcResponse> {
        if self.system.is_some() {
            Ok(self.system.as_mut().expect("checked is_some"))
        } else {
            Err(RpcResponse::error(
                id.clone(),
                -32000,
                "No system instance. Call 'boot' first.".to_string(),
            ))
        }
    }

    fn handle_boot(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let ram_kb = params.get("ram_kb").and_then(JsonValue::as_u64).unwrap_or(32) as u16;

        let microcode_path = params.get("microcode_path").and_then(JsonValue::as_str);
        let microcode_words = match microcode_path {
            Some(path) => match std::fs::read(path) {
                Ok(bytes) => bytes
                    .chunks(4)
                    .map(|c| {
                        let mut buf = [0u8; 4];
                        buf[..c.len()].copy_from_slice(c);
                        u32::from_le_bytes(buf) & 0x000F_FFFF
                    })
                    .collect(),
                Err(e) => return RpcResponse::error(id, -32000, format!("Cannot read microcode image: {e}")),
            },
            None => Vec::new(),
        };

        let keyboard_rom = match params.get("keyboard_rom_path").and_then(JsonValue::as_str) {
            Some(path) => match std::fs::read(path) {
                Ok(bytes) => bytes,
                Err(e) => return RpcResponse::error(id, -32000, format!("Cannot read keyboard ROM: {e}")),
            },
            None => Vec::new(),
        };

        let config = Config {
            ram_kb,
            microcode_variant: MicrocodeVariant::Wang2200T,
            microcode_words,
            keyboard_rom,
            trace: Trace::none(),
        };

        match System::new(&config) {
            Ok(system) => {
                self.system = Some(system);
                RpcResponse::success(id, serde_json::json!({"status": "ok"}))
            }
            Err(e) => RpcResponse::error(id, -32000, format!("Configuration error: {e}")),
        }
    }

    fn handle_reset(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let hard = params.get("hard").and_then(JsonValue::as_bool).unwrap_or(true);
        system.reset(hard);
        RpcResponse::success(id, serde_json::json!({"status": "ok"}))
    }

    fn handle_step(&mut self, _params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        match system.step() {
            Ok(()) => RpcResponse::success(
                id,
                serde_json::json!({"micro_ops_executed": system.micro_ops_executed()}),
            ),
            Err(fault) => RpcResponse::error(id, -32001, fault.to_string()),
        }
    }

    fn handle_run(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let count = params.get("micro_ops").and_then(JsonValue::as_u64).unwrap_or(1);
        match system.run(count) {
            Ok(n) => RpcResponse::success(
                id,
                serde_json::json!({"ran": n, "micro_ops_executed": system.micro_ops_executed()}),
            ),
            Err(fault) => RpcResponse::error(id, -32001, fault.to_string()),
        }
    }

    fn handle_query(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };

        let path = match params.get("path").and_then(JsonValue::as_str) {
            Some(p) => p,
            None => return RpcResponse::error(id, -32602, "Missing 'path' parameter".to_string()),
        };

        match system.query(path) {
            Some(value) => {
                let json_val: JsonValue = value.into();
                RpcResponse::success(id, serde_json::json!({"path": path, "value": json_val}))
            }
            None => RpcResponse::error(id, -32000, format!("Unknown query path: {path}")),
        }
    }

    fn handle_insert_disk(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };

        let drive = match params.get("drive").and_then(JsonValue::as_u64) {
            Some(d) if (d as usize) < NUM_DRIVES => d as usize,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    format!("Missing or invalid 'drive' (0-{})", NUM_DRIVES - 1),
                );
            }
        };

        let path = match params.get("path").and_then(JsonValue::as_str) {
            Some(p) => p,
            None => return RpcResponse::error(id, -32602, "Missing 'path' parameter".to_string()),
        };

        match Vdisk::open(path) {
            Ok(vdisk) => {
                system.insert_disk(drive, vdisk);
                RpcResponse::success(id, serde_json::json!({"drive": drive, "path": path}))
            }
            Err(e) => RpcResponse::error(id, -32000, format!("Cannot open disk image: {e}")),
        }
    }

    fn handle_eject_disk(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };

        let drive = match params.get("drive").and_then(JsonValue::as_u64) {
            Some(d) if (d as usize) < NUM_DRIVES => d as usize,
            _ => {
                return RpcResponse::error(
                    id,
                    -32602,
                    format!("Missing or invalid 'drive' (0-{})", NUM_DRIVES - 1),
                );
            }
        };

        let ejected = system.eject_disk(drive).is_some();
        RpcResponse::success(id, serde_json::json!({"drive": drive, "ejected": ejected}))
    }

    fn handle_push_key(&mut self, params: &JsonValue, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };

        let code = match params.get("code").and_then(JsonValue::as_u64) {
            Some(c) if c <= 0xFF => c as u8,
            _ => return RpcResponse::error(id, -32602, "Missing or invalid 'code' (0-255)".to_string()),
        };
        let special = params.get("special").and_then(JsonValue::as_bool).unwrap_or(false);

        let event = if special { KeyEvent::special(code) } else { KeyEvent::plain(code) };
        system.push_key(event);
        RpcResponse::success(id, serde_json::json!({"code": code, "special": special}))
    }

    fn handle_drain_terminal_output(&mut self, id: JsonValue) -> RpcResponse {
        let system = match self.require_system(&id) {
            Ok(s) => s,
            Err(e) => return e,
        };
        let bytes = system.drain_terminal_output();
        RpcResponse::success(id, serde_json::json!({"bytes": bytes}))
    }
}

impl Default for McpServer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_method_returns_error() {
        let mut server = McpServer::new();
        let resp = server.dispatch("nonexistent", &JsonValue::Null, JsonValue::from(1));
        assert!(resp.error.is_some());
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(-32601));
    }

    #[test]
    fn step_without_boot_returns_error() {
        let mut server = McpServer::new();
        let resp = server.dispatch("step", &JsonValue::Null, JsonValue::from(1));
        assert!(resp.error.is_some());
        assert_eq!(resp.error.as_ref().map(|e| e.code), Some(-32000));
    }

    #[test]
    fn boot_then_query_known_path_succeeds() {
        let mut server = McpServer::new();
        let boot = server.dispatch("boot", &serde_json::json!({"ram_kb": 16}), JsonValue::from(1));
        assert!(boot.error.is_none());

        let resp = server.dispatch(
            "query",
            &serde_json::json!({"path": "cpu.ic"}),
            JsonValue::from(2),
        );
        assert!(resp.error.is_none());
    }

    #[test]
    fn boot_rejects_illegal_ram_size() {
        let mut server = McpServer::new();
        let resp = server.dispatch("boot", &serde_json::json!({"ram_kb": 7}), JsonValue::from(1));
        assert!(resp.error.is_some());
    }

    #[test]
    fn push_key_then_drain_output_round_trip_is_empty_until_cpu_writes() {
        let mut server = McpServer::new();
        server.dispatch("boot", &serde_json::json!({}), JsonValue::from(1));
        let resp = server.dispatch(
            "push_key",
            &serde_json::json!({"code": 65}),
            JsonValue::from(2),
        );
        assert!(resp.error.is_none());
        let drained = server.dispatch("drain_terminal_output", &JsonValue::Null, JsonValue::from(3));
        assert!(drained.error.is_none());
    }
}
