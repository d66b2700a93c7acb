//! Mock ACP agent binary for integration testing
//!
//! Spawned as a subprocess to simulate a real ACP agent: reads JSON-RPC
//! lines from stdin and writes responses to stdout. Behavior is scripted
//! through command-line flags so each test gets a deterministic agent.
//!
//! Usage:
//!   mock-acp-agent [--chunks <a,b,c>] [--stop-reason <reason>] [--nested]
//!                  [--omit-protocol-version] [--tool-call]
//!                  [--request-permission] [--request-read <path>]
//!                  [--request-terminal] [--delay <ms>]

use std::env;

#[path = "../support/mock_stdio_agent.rs"]
mod mock_stdio_agent;

use mock_stdio_agent::{MockAgentConfig, MockStdioAgent};

fn main() {
    let args: Vec<String> = env::args().collect();
    let mut config = MockAgentConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--chunks" => {
                if i + 1 < args.len() {
                    config.chunks = args[i + 1].split(',').map(str::to_string).collect();
                    i += 2;
                } else {
                    eprintln!("Missing value for --chunks");
                    std::process::exit(1);
                }
            }
            "--stop-reason" => {
                if i + 1 < args.len() {
                    config.stop_reason = args[i + 1].clone();
                    i += 2;
                } else {
                    eprintln!("Missing value for --stop-reason");
                    std::process::exit(1);
                }
            }
            "--nested" => {
                config.nested_updates = true;
                i += 1;
            }
            "--omit-protocol-version" => {
                config.protocol_version = None;
                i += 1;
            }
            "--tool-call" => {
                config.emit_tool_call = true;
                i += 1;
            }
            "--request-permission" => {
                config.request_permission = true;
                i += 1;
            }
            "--request-read" => {
                if i + 1 < args.len() {
                    config.request_read = Some(args[i + 1].clone());
                    i += 2;
                } else {
                    eprintln!("Missing value for --request-read");
                    std::process::exit(1);
                }
            }
            "--request-terminal" => {
                config.request_terminal = true;
                i += 1;
            }
            "--delay" => {
                if i + 1 < args.len() {
                    config.response_delay_ms = args[i + 1].parse().unwrap_or(0);
                    i += 2;
                } else {
                    eprintln!("Missing value for --delay");
                    std::process::exit(1);
                }
            }
            other => {
                eprintln!("Unknown argument: {other}");
                std::process::exit(1);
            }
        }
    }

    let mut agent = MockStdioAgent::new(config);
    if let Err(err) = agent.run() {
        eprintln!("Mock agent error: {err}");
        std::process::exit(1);
    }
}
