use code_sandbox::{
    create_sandbox_with_options, CodeEngine, CodeSandbox, SandboxOptions,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Default)]
struct WorkerConfig {
    config_path: Option<PathBuf>,
    python_path_override: Option<PathBuf>,
    output_dir_override: Option<PathBuf>,
}

impl WorkerConfig {
    fn from_env_and_args() -> Self {
        let args: Vec<String> = std::env::args().collect();

        let mut cfg = Self {
            config_path: std::env::var("CODE_SANDBOX_CONFIG").ok().map(PathBuf::from),
            ..Default::default()
        };

        let mut i = 1;
        while i < args.len() {
            let value = args.get(i + 1).map(PathBuf::from);
            match args[i].as_str() {
                "--config" => {
                    if value.is_some() {
                        cfg.config_path = value;
                    }
                    i += 2;
                }
                "--python-path" => {
                    if value.is_some() {
                        cfg.python_path_override = value;
                    }
                    i += 2;
                }
                "--output-dir" => {
                    if value.is_some() {
                        cfg.output_dir_override = value;
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }

        cfg
    }

    fn sandbox_options(&self) -> SandboxOptions {
        SandboxOptions {
            config_path: self.config_path.clone(),
            python_path: self.python_path_override.clone(),
            output_dir: self.output_dir_override.clone(),
            ..SandboxOptions::service()
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // stdout carries responses, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "code_sandbox_worker=info,code_sandbox=info".to_string()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cfg = WorkerConfig::from_env_and_args();
    tracing::info!("code-sandbox-worker starting (config={:?})", cfg.config_path);

    let sandbox = create_sandbox_with_options(cfg.sandbox_options())?;
    let sweeper = sandbox.spawn_sweeper();

    let stdin = BufReader::new(io::stdin());
    let mut lines = stdin.lines();
    let mut stdout = io::stdout();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let parsed: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("invalid json-rpc line: {} | err={}", line, e);
                continue;
            }
        };

        let Some(reply) = handle_message(&sandbox, parsed).await else {
            continue;
        };
        let s = serde_json::to_string(&reply.response)?;
        stdout.write_all(s.as_bytes()).await?;
        stdout.write_all(b"\n").await?;
        stdout.flush().await?;

        if reply.shutdown {
            break;
        }
    }

    sweeper.abort();
    tracing::info!("code-sandbox-worker stopped");
    Ok(())
}

struct Reply {
    response: Value,
    shutdown: bool,
}

async fn handle_message(sandbox: &CodeSandbox, msg: Value) -> Option<Reply> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id and get no response
    let id = id?;

    let mut shutdown = false;
    let result = match method {
        "validate" => required_str(&params, "code").map(|code| {
            let validation = sandbox.validate(code);
            json!({
                "accepted": validation.is_accepted(),
                "errors": validation.errors(),
                "violations": validation.violations,
            })
        }),
        "execute" => match required_str(&params, "code") {
            Ok(code) => Ok(json!(sandbox.execute(code).await)),
            Err(e) => Err(e),
        },
        "sweep" => sandbox
            .sweep()
            .map(|report| json!(report))
            .map_err(|e| json!({ "code": -32000, "message": e.to_string() })),
        "resolve" => required_str(&params, "path").and_then(|path| {
            match sandbox.resolve_artifact(path) {
                Some((file, content_type)) => Ok(json!({ "file": file, "content_type": content_type })),
                None => Err(json!({
                    "code": -32000,
                    "message": format!("Artifact not found: {}", path)
                })),
            }
        }),
        "shutdown" => {
            shutdown = true;
            Ok(Value::Null)
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    let response = match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    };
    Some(Reply { response, shutdown })
}

fn required_str<'a>(params: &'a Value, key: &str) -> std::result::Result<&'a str, Value> {
    params.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        json!({
            "code": -32602,
            "message": format!("Missing required argument: {}", key)
        })
    })
}
