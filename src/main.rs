mod classifier;
mod config;
mod error;
mod llm;
mod orchestrator;
mod sandbox;
mod vault;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::classifier::ClassifierGate;
use crate::config::Config;
use crate::llm::BackendRegistry;
use crate::orchestrator::{ActionOrchestrator, ActionParams, ActionStatus, AuditLog};
use crate::sandbox::SandboxEngine;
use crate::vault::{AccessLevel, SecretsVault};

fn print_help() {
    println!(
        "\
warden v{}

A zero-trust action-execution backend: tiered approval gating and
hardened sandboxed skill execution.

USAGE:
    warden [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/agent.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG         Log level filter for tracing
                     (e.g. debug, warden=debug,warn)
    LLM_API_KEY      API key for remote LLM providers, if configured

EXAMPLES:
    warden                            # uses config/agent.toml
    warden /etc/warden/agent.toml     # custom config path
    RUST_LOG=debug warden             # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

fn print_console_help() {
    println!(
        "\
Console commands:
    <message>              submit a chat action
    /skill <id> <command>  run a command in a sandbox for skill <id>
    /model <name>          switch the active model
    /pending               list actions awaiting approval
    /approve <action-id>   approve a pending action
    /deny <action-id>      reject a pending action
    /status <action-id>    show one action
    /audit                 show recent audit entries
    /help                  this message
    /quit                  shut down"
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("warden v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warden=info")),
        )
        .init();

    println!(
        r#"
 __        __            _
 \ \      / /_ _ _ __ __| | ___ _ __
  \ \ /\ / / _` | '__/ _` |/ _ \ '_ \
   \ V  V / (_| | | | (_| |  __/ | | |
    \_/\_/ \__,_|_|  \__,_|\___|_| |_|  v{}
"#,
        env!("CARGO_PKG_VERSION")
    );

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/agent.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Agent: {}", config.agent.name);
    info!("LLM: {} ({})", config.llm.provider, config.llm.model);
    info!(
        "Privileged skills: {}",
        config.orchestrator.privileged_skills.join(", ")
    );

    // Secrets live in the vault, never on the services that use them
    let vault = Arc::new(SecretsVault::new());
    if let Some(api_key) = &config.llm.api_key {
        vault.store("llm.api_key", api_key, AccessLevel::Elevated);
        info!("LLM API key loaded into the vault");
    }

    // LLM backend selection via the registry
    let registry = BackendRegistry::from_config(&config.llm);
    let llm = registry.get(&config.llm.provider).ok_or_else(|| {
        anyhow!(
            "unknown LLM provider '{}' (available: {})",
            config.llm.provider,
            registry.names().join(", ")
        )
    })?;
    if llm.health_check().await {
        info!("LLM backend '{}' is reachable", llm.name());
    } else {
        warn!(
            "LLM backend '{}' not reachable at {}; chat actions will fail until it is",
            llm.name(),
            config.llm.host
        );
    }

    // Sandbox runtime detection (strongest isolation first)
    let sandbox = Arc::new(SandboxEngine::detect(config.sandbox.clone()).await);
    match sandbox.runtime_kind() {
        Some(kind) => info!("Sandbox runtime: {kind}"),
        None => warn!("Skill execution disabled: no sandbox runtime on this host"),
    }

    let orchestrator = ActionOrchestrator::new(
        &config,
        ClassifierGate::new(config.classifier.clone()),
        Arc::clone(&sandbox),
        llm,
        AuditLog::new(config.audit.file.clone()),
    );

    info!("Ready");
    println!("Type a message to chat, /help for commands.");

    // ── Operator console ───────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if !handle_line(&orchestrator, line.trim()) {
                            break;
                        }
                    }
                    Ok(None) => {
                        info!("stdin closed, shutting down");
                        break;
                    }
                    Err(e) => {
                        error!("stdin: {e}");
                        break;
                    }
                }
            }
        }
    }

    orchestrator.shutdown().await;
    sandbox.cleanup().await;
    info!("Shutdown complete");
    Ok(())
}

/// Handles one console line. Returns false to shut down.
fn handle_line(orchestrator: &Arc<ActionOrchestrator>, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }
    if !line.starts_with('/') {
        let action = orchestrator.submit(
            ActionParams::Chat {
                message: line.to_string(),
                model: None,
            },
            None,
        );
        announce(orchestrator, action.id);
        return true;
    }

    let mut parts = line.splitn(3, ' ');
    let command = parts.next().unwrap_or_default();
    match command {
        "/quit" | "/exit" => return false,
        "/help" => print_console_help(),
        "/pending" => {
            let pending = orchestrator.list_pending();
            if pending.is_empty() {
                println!("no actions awaiting approval");
            }
            for action in pending {
                println!(
                    "{}  {}  tier={}  created={}",
                    action.id,
                    action.params.kind(),
                    action.tier,
                    action.created_at.format("%H:%M:%S")
                );
            }
        }
        "/approve" | "/deny" => {
            let approved = command == "/approve";
            match parts.next().map(Uuid::parse_str) {
                Some(Ok(id)) => match orchestrator.approve(id, approved, "console") {
                    Ok(action) => {
                        println!("action {id} is now {}", action.status);
                        if approved {
                            announce(orchestrator, id);
                        }
                    }
                    Err(e) => println!("{e}"),
                },
                _ => println!("usage: {command} <action-id>"),
            }
        }
        "/model" => match parts.next() {
            Some(model) => {
                let action = orchestrator.submit(
                    ActionParams::ModelSwitch {
                        model: model.to_string(),
                    },
                    None,
                );
                announce(orchestrator, action.id);
            }
            None => println!("usage: /model <name>"),
        },
        "/skill" => match (parts.next(), parts.next()) {
            (Some(skill_id), Some(cmd)) => {
                let action = orchestrator.submit(
                    ActionParams::SkillExecution {
                        skill_id: skill_id.to_string(),
                        command: cmd.to_string(),
                        limits: None,
                    },
                    None,
                );
                if action.status == ActionStatus::Pending {
                    println!(
                        "action {} held for approval (tier {}); /approve {} or /deny {}",
                        action.id, action.tier, action.id, action.id
                    );
                } else {
                    announce(orchestrator, action.id);
                }
            }
            _ => println!("usage: /skill <id> <command>"),
        },
        "/status" => match parts.next().map(Uuid::parse_str) {
            Some(Ok(id)) => match orchestrator.get_status(id) {
                Some(action) => println!(
                    "{}  {}  tier={}  status={}{}",
                    action.id,
                    action.params.kind(),
                    action.tier,
                    action.status,
                    action
                        .error
                        .map(|e| format!("  error={e}"))
                        .unwrap_or_default()
                ),
                None => println!("no such action"),
            },
            _ => println!("usage: /status <action-id>"),
        },
        "/audit" => {
            for entry in orchestrator.audit().recent(20).into_iter().rev() {
                println!(
                    "{}  action={}  type={}  status={}{}",
                    entry.timestamp.format("%H:%M:%S"),
                    entry.action_id,
                    entry.action_type,
                    entry.status,
                    entry
                        .outcome
                        .map(|o| format!("  outcome={o}"))
                        .unwrap_or_default()
                );
            }
        }
        _ => println!("unknown command {command}; /help for commands"),
    }
    true
}

/// Prints the outcome of an action when it reaches a terminal state.
/// Runs in the background so the console stays responsive.
fn announce(orchestrator: &Arc<ActionOrchestrator>, id: Uuid) {
    let orchestrator = Arc::clone(orchestrator);
    tokio::spawn(async move {
        // Bounded poll: generation plus sandbox teardown fit well
        // inside two minutes.
        for _ in 0..1200 {
            if let Some(action) = orchestrator.get_status(id) {
                if action.status.is_terminal() {
                    match (action.status, action.result, action.error) {
                        (ActionStatus::Completed, Some(result), _) => {
                            if let Some(text) = result.get("response").and_then(|v| v.as_str()) {
                                println!("\n{text}\n");
                            } else {
                                println!("\naction {id} completed: {result}\n");
                            }
                        }
                        (status, _, err) => {
                            println!(
                                "\naction {id}: {status}{}\n",
                                err.map(|e| format!(" ({e})")).unwrap_or_default()
                            );
                        }
                    }
                    return;
                }
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        warn!("action {id} still not terminal after two minutes");
    });
}
