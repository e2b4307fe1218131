use codequest::{
    Binding, ChallengeRegistry, ChallengeSession, Difficulty, SandboxConfig, SandboxError,
    SecurityProfile,
};
use codequest::process::locate_runner;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::io::{self, AsyncBufReadExt, AsyncWriteExt, BufReader};

#[derive(Debug, Clone, Default)]
struct WorkerConfig {
    config_path: Option<PathBuf>,
    profile: Option<SecurityProfile>,
}

impl WorkerConfig {
    fn from_args() -> anyhow::Result<Self> {
        let args: Vec<String> = std::env::args().collect();
        let mut cfg = WorkerConfig::default();

        let mut i = 1;
        while i < args.len() {
            match args[i].as_str() {
                "--config" => {
                    if let Some(v) = args.get(i + 1) {
                        cfg.config_path = Some(PathBuf::from(v));
                    }
                    i += 2;
                }
                "--profile" => {
                    if let Some(v) = args.get(i + 1) {
                        let profile = SecurityProfile::parse(v)
                            .ok_or_else(|| anyhow::anyhow!("unknown profile: {}", v))?;
                        cfg.profile = Some(profile);
                    }
                    i += 2;
                }
                _ => i += 1,
            }
        }
        Ok(cfg)
    }

    fn sandbox_config(&self) -> anyhow::Result<SandboxConfig> {
        let mut config = match &self.config_path {
            Some(path) => SandboxConfig::from_file(path)?,
            None => SandboxConfig::default(),
        };
        config = config.with_env_overrides()?;
        if let Some(profile) = self.profile {
            config.profile = profile;
            config.limits = profile.resource_limits();
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "codequest_worker=info,codequest=info".to_string()),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cfg = WorkerConfig::from_args()?;
    let config = cfg.sandbox_config()?;
    tracing::info!(
        "codequest-worker starting (profile={:?}: {}, config={:?})",
        config.profile,
        config.profile.description(),
        cfg.config_path
    );
    match locate_runner(config.runner_path.as_deref()) {
        Ok(runner) => tracing::info!("using js runner at {}", runner.display()),
        Err(e) => tracing::warn!("{}; runs will fail until it is installed", e),
    }

    let registry = ChallengeRegistry::with_builtins();
    let session = ChallengeSession::new(registry, config);

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

        let response = handle_message(&session, parsed).await;
        if let Some(resp) = response {
            let s = serde_json::to_string(&resp)?;
            stdout.write_all(s.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    Ok(())
}

async fn handle_message(session: &ChallengeSession, msg: Value) -> Option<Value> {
    let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
    let id = msg.get("id").cloned();
    let params = msg.get("params").cloned().unwrap_or_else(|| json!({}));

    // Notifications have no id: ignore most, but allow "exit" to terminate.
    if id.is_none() {
        if method == "exit" {
            std::process::exit(0);
        }
        return None;
    }

    let result = match method {
        "initialize" => Ok(json!({
            "serverInfo": {
                "name": "CodeQuest Sandbox Worker",
                "version": env!("CARGO_PKG_VERSION")
            },
            "engine": session.harness().capabilities(),
            "profile": session.harness().config().profile,
            "profileDescription": session.harness().config().profile.description(),
        })),
        "challenges/list" => list_challenges(session, &params),
        "challenges/get" => get_challenge(session, &params),
        "challenges/run" => run_challenge(session, &params).await,
        "code/run" => run_code(session, &params).await,
        "shutdown" => {
            std::process::exit(0);
        }
        _ => Err(json!({
            "code": -32601,
            "message": format!("Method not found: {}", method)
        })),
    };

    Some(match result {
        Ok(v) => json!({ "jsonrpc": "2.0", "result": v, "id": id }),
        Err(err_obj) => json!({ "jsonrpc": "2.0", "error": err_obj, "id": id }),
    })
}

fn invalid_params(message: impl Into<String>) -> Value {
    json!({ "code": -32602, "message": message.into() })
}

fn sandbox_error(err: SandboxError) -> Value {
    json!({
        "code": -32000,
        "message": err.to_string(),
        "data": { "kind": err.kind() }
    })
}

fn str_param<'a>(params: &'a Value, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| params.get(*k).and_then(|v| v.as_str()))
}

fn list_challenges(session: &ChallengeSession, params: &Value) -> Result<Value, Value> {
    let registry = session.registry();
    let mut challenges = match str_param(params, &["category"]) {
        Some(category) => registry.list_by_category(category),
        None => registry.all(),
    };
    if let Some(raw) = str_param(params, &["difficulty"]) {
        let difficulty = Difficulty::parse(raw)
            .ok_or_else(|| invalid_params(format!("unknown difficulty: {}", raw)))?;
        challenges.retain(|c| c.difficulty == difficulty);
    }
    let summaries: Vec<_> = challenges.iter().map(|c| c.summary()).collect();
    Ok(json!({ "challenges": summaries }))
}

fn get_challenge(session: &ChallengeSession, params: &Value) -> Result<Value, Value> {
    let id = str_param(params, &["id", "challengeId", "challenge_id"])
        .ok_or_else(|| invalid_params("missing challenge id"))?;
    let challenge = session
        .registry()
        .get(id)
        .ok_or_else(|| sandbox_error(SandboxError::ChallengeNotFound(id.to_string())))?;
    serde_json::to_value(challenge.summary()).map_err(|e| sandbox_error(e.into()))
}

async fn run_challenge(session: &ChallengeSession, params: &Value) -> Result<Value, Value> {
    let id = str_param(params, &["challengeId", "challenge_id", "id"])
        .ok_or_else(|| invalid_params("missing challengeId"))?;
    let code = str_param(params, &["code"]).ok_or_else(|| invalid_params("missing code"))?;

    let result = session
        .run_challenge(id, code)
        .await
        .map_err(sandbox_error)?;
    serde_json::to_value(result).map_err(|e| sandbox_error(e.into()))
}

async fn run_code(session: &ChallengeSession, params: &Value) -> Result<Value, Value> {
    let code = str_param(params, &["code"]).ok_or_else(|| invalid_params("missing code"))?;
    let context = match params.get("context") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(k, v)| (k.clone(), Binding::from(v.clone())))
            .collect(),
        Some(_) => return Err(invalid_params("context must be an object")),
    };

    let result = session.run_code(code, context).await.map_err(sandbox_error)?;
    serde_json::to_value(result).map_err(|e| sandbox_error(e.into()))
}
