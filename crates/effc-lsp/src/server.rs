//! Content-Length-framed JSON-RPC loop over an [`LspHandler`], factored out
//! of `main.rs` so `effc-cli --server` can run the same loop in-process.

use std::io::{self, BufRead, BufReader, Write};

use serde::Deserialize;
use serde_json::{Value, json};

use crate::LspHandler;

/// JSON-RPC request payload used by this minimal language server.
#[derive(Debug, Deserialize)]
struct RpcRequest {
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

/// Runs the read-dispatch-write loop over `input`/`output` until `input`
/// is exhausted. Blocking; intended for stdio but takes generic streams
/// so tests can drive it over an in-memory buffer.
pub fn run_loop(input: impl std::io::Read, mut output: impl Write) -> io::Result<()> {
    let mut reader = BufReader::new(input);
    let mut handler = LspHandler::new();

    while let Some(body) = read_framed_message(&mut reader)? {
        let raw_message = match serde_json::from_slice::<Value>(&body) {
            Ok(message) => message,
            Err(err) => {
                let response = error_response(&Value::Null, -32700, &format!("parse error: {err}"));
                write_framed_message(&mut output, &response)?;
                continue;
            }
        };

        if is_json_rpc_notification(&raw_message) {
            continue;
        }

        let response = match serde_json::from_value::<RpcRequest>(raw_message) {
            Ok(request) => handle_request(&mut handler, request),
            Err(err) => error_response(&Value::Null, -32700, &format!("parse error: {err}")),
        };
        write_framed_message(&mut output, &response)?;
    }

    Ok(())
}

/// Convenience entry point over real stdin/stdout, used by both
/// `effc-lsp`'s own binary and `effc-cli --server`.
pub fn run_stdio_loop() -> io::Result<()> {
    let stdin = io::stdin();
    let stdout = io::stdout();
    run_loop(stdin.lock(), stdout.lock())
}

/// Returns true when the payload is a JSON-RPC 2.0 notification.
///
/// Notifications contain a string `method` and intentionally omit `id`.
/// The server must not produce any response for these messages.
fn is_json_rpc_notification(payload: &Value) -> bool {
    let Some(object) = payload.as_object() else {
        return false;
    };

    object.get("jsonrpc").and_then(Value::as_str) == Some("2.0")
        && object.get("method").is_some_and(Value::is_string)
        && !object.contains_key("id")
}

fn handle_request(handler: &mut LspHandler, request: RpcRequest) -> Value {
    if !KNOWN_METHODS.contains(&request.method.as_str()) {
        return error_response(&request.id, -32601, "method not found");
    }
    let session = session_id(&request.params);
    let result: Result<Value, String> = match request.method.as_str() {
        "initialize" => Ok(json!({
            "capabilities": {
                "definitionProvider": true,
                "referencesProvider": true,
                "hoverProvider": true,
                "codeActionProvider": true,
                "executeCommandProvider": { "commands": ["inferredCaptures"] },
            },
            "serverInfo": {
                "name": "effc-lsp",
                "version": "0.0.1"
            }
        })),
        "notifications/initialized" => Ok(json!({})),
        "operations/list" => Ok(json!({
            "operations": LspHandler::operations()
                .iter()
                .map(|op| json!({ "name": op.name, "description": op.description }))
                .collect::<Vec<_>>()
        })),
        "textDocument/didOpen" => required_session(&request.params).and_then(|id| {
            handler.open_document(&id)?;
            Ok(json!({}))
        }),
        "textDocument/didClose" => required_session(&request.params).and_then(|id| {
            handler.close_document(&id)?;
            Ok(json!({}))
        }),
        "getSymbols" => handler.get_symbols(session.as_deref()),
        "getSymbolAt" => node_param(&request.params).and_then(|node| handler.get_symbol_at(session.as_deref(), node)),
        "getDefinition" => node_param(&request.params).and_then(|node| handler.get_definition(session.as_deref(), node)),
        "getReferences" => node_param(&request.params).and_then(|node| handler.get_references(session.as_deref(), node)),
        "getHover" => node_param(&request.params).and_then(|node| handler.get_hover(session.as_deref(), node)),
        "getCodeActions" => handler.get_code_actions(session.as_deref()),
        "workspace/executeCommand" => execute_command(handler, session.as_deref(), &request.params),
        _ => unreachable!("filtered by KNOWN_METHODS above"),
    };

    match result {
        Ok(value) => success_response(&request.id, &value),
        Err(err) => error_response(&request.id, -32000, &err),
    }
}

const KNOWN_METHODS: &[&str] = &[
    "initialize",
    "notifications/initialized",
    "operations/list",
    "textDocument/didOpen",
    "textDocument/didClose",
    "getSymbols",
    "getSymbolAt",
    "getDefinition",
    "getReferences",
    "getHover",
    "getCodeActions",
    "workspace/executeCommand",
];

fn execute_command(handler: &mut LspHandler, session: Option<&str>, params: &Value) -> Result<Value, String> {
    #[derive(Deserialize)]
    struct Params {
        command: String,
        #[serde(default)]
        arguments: Value,
    }
    let params: Params = serde_json::from_value(params.clone()).map_err(|e| format!("invalid executeCommand params: {e}"))?;
    let command_args = params.arguments.get(0).cloned().unwrap_or(Value::Null);
    handler.execute_command(session, &params.command, command_args)
}

fn session_id(params: &Value) -> Option<String> {
    params.get("sessionId").and_then(Value::as_str).map(str::to_owned)
}

fn required_session(params: &Value) -> Result<String, String> {
    session_id(params).ok_or_else(|| "missing sessionId".to_string())
}

fn node_param(params: &Value) -> Result<u32, String> {
    #[derive(Deserialize)]
    struct Params {
        node: u32,
    }
    let params: Params = serde_json::from_value(params.clone()).map_err(|e| format!("invalid params: {e}"))?;
    Ok(params.node)
}

fn success_response(id: &Value, result: &Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": result,
    })
}

fn error_response(id: &Value, code: i32, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": code,
            "message": message,
        },
    })
}

/// Reads one Content-Length framed message body from a reader.
fn read_framed_message(reader: &mut impl BufRead) -> io::Result<Option<Vec<u8>>> {
    let mut content_length = None;
    loop {
        let mut header_line = String::new();
        let read = reader.read_line(&mut header_line)?;
        if read == 0 {
            return Ok(None);
        }
        let trimmed = header_line.trim_end_matches(['\r', '\n']);
        if trimmed.is_empty() {
            break;
        }
        if let Some(value) = trimmed.strip_prefix("Content-Length:") {
            let length = value
                .trim()
                .parse::<usize>()
                .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("invalid Content-Length: {err}")))?;
            content_length = Some(length);
        }
    }

    let Some(content_length) = content_length else {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            "missing Content-Length header",
        ));
    };

    let mut body = vec![0; content_length];
    reader.read_exact(&mut body)?;
    Ok(Some(body))
}

/// Writes one Content-Length framed JSON message to a writer.
fn write_framed_message(writer: &mut impl Write, payload: &Value) -> io::Result<()> {
    let body = serde_json::to_vec(payload)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidData, format!("serialize error: {err}")))?;
    write!(writer, "Content-Length: {}\r\n\r\n", body.len())?;
    writer.write_all(&body)?;
    writer.flush()
}
