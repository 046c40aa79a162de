use clap::{Parser, Subcommand, ValueEnum};
use dotenvy::dotenv;
use gateway_common::capture_env;
use gateway_sandbox::{FsMode, FsOp, NetEgress, NetOp, PermissionOverrides};
use gateway_security_core::{GatewaySecurityConfig, SecurityCore};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
enum CliError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("allowlist error: {0}")]
    Allowlist(#[from] gateway_ip_allowlist::IpAllowlistError),
    #[error("sandbox violation: {0}")]
    Sandbox(#[from] gateway_sandbox::SandboxError),
}

#[derive(Parser)]
#[command(name = "security-cli", version, about = "Gateway security core operational utilities")]
struct Args {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Copy, Clone, ValueEnum)]
enum FsOpArg {
    Read,
    Write,
    Execute,
}

impl From<FsOpArg> for FsOp {
    fn from(v: FsOpArg) -> Self {
        match v {
            FsOpArg::Read => FsOp::Read,
            FsOpArg::Write => FsOp::Write,
            FsOpArg::Execute => FsOp::Execute,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum NetOpArg {
    Connect,
    Listen,
}

impl From<NetOpArg> for NetOp {
    fn from(v: NetOpArg) -> Self {
        match v {
            NetOpArg::Connect => NetOp::Connect,
            NetOpArg::Listen => NetOp::Listen,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum FsModeArg {
    Deny,
    ReadOnly,
    SandboxOnly,
    WorkspaceOnly,
    Unrestricted,
}

impl From<FsModeArg> for FsMode {
    fn from(v: FsModeArg) -> Self {
        match v {
            FsModeArg::Deny => FsMode::Deny,
            FsModeArg::ReadOnly => FsMode::ReadOnly,
            FsModeArg::SandboxOnly => FsMode::SandboxOnly,
            FsModeArg::WorkspaceOnly => FsMode::WorkspaceOnly,
            FsModeArg::Unrestricted => FsMode::Unrestricted,
        }
    }
}

#[derive(Copy, Clone, ValueEnum)]
enum NetEgressArg {
    Deny,
    Allowlist,
    Unrestricted,
}

impl From<NetEgressArg> for NetEgress {
    fn from(v: NetEgressArg) -> Self {
        match v {
            NetEgressArg::Deny => NetEgress::Deny,
            NetEgressArg::Allowlist => NetEgress::Allowlist,
            NetEgressArg::Unrestricted => NetEgress::Unrestricted,
        }
    }
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Run the Public-Bind Guard against the current process environment.
    CheckBind {
        #[arg(long)]
        host: String,
        #[arg(long)]
        tls: bool,
        #[arg(long)]
        has_token: bool,
        #[arg(long)]
        has_password: bool,
        #[arg(long)]
        has_tailscale_auth: bool,
    },

    /// Parse a comma-separated IP/CIDR allowlist and print the parsed entries.
    ParseAllowlist {
        raw: String,
    },

    /// Test whether `ip` matches a parsed allowlist.
    MatchIp {
        ip: String,
        allowlist: String,
    },

    /// Classify a shell command string as safe, suspicious, or blocked.
    CheckCommand {
        command: String,
    },

    /// Redact secrets out of a free-text string.
    RedactText {
        text: String,
    },

    /// Check a filesystem operation against a skill's sandbox policy.
    CheckFs {
        #[arg(long)]
        skill_id: String,
        #[arg(long, default_value = "/var/lib/gateway")]
        base_dir: String,
        #[arg(long, value_enum, default_value = "read-only")]
        mode: FsModeArg,
        #[arg(long, value_enum)]
        op: FsOpArg,
        path: PathBuf,
    },

    /// Check a network operation against a skill's sandbox policy.
    CheckNet {
        #[arg(long)]
        skill_id: String,
        #[arg(long, default_value = "/var/lib/gateway")]
        base_dir: String,
        #[arg(long, value_enum, default_value = "deny")]
        egress: NetEgressArg,
        #[arg(long = "allow", value_delimiter = ',')]
        egress_allowlist: Vec<String>,
        #[arg(long, value_enum)]
        op: NetOpArg,
        hostname: String,
    },

    /// Check a subprocess invocation against a skill's sandbox policy.
    CheckSub {
        #[arg(long)]
        skill_id: String,
        #[arg(long, default_value = "/var/lib/gateway")]
        base_dir: String,
        #[arg(long)]
        allow_subprocess: bool,
        command: String,
        args: Vec<String>,
    },

    /// Strip impersonation fields from a JSON payload read from a file.
    StripIdentity {
        payload_json: PathBuf,
    },
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("ERROR: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    let _ = dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();
    let args = Args::parse();

    match args.cmd {
        Command::CheckBind { host, tls, has_token, has_password, has_tailscale_auth } => {
            let core = SecurityCore::new(GatewaySecurityConfig::default()).expect("default config always builds");
            let decision = core.on_bind(&host, tls, has_token, has_password, has_tailscale_auth, capture_env());
            println!("{}", serde_json::to_string(&decision)?);
            Ok(())
        }

        Command::ParseAllowlist { raw } => {
            let entries = gateway_ip_allowlist::parse(&raw)?;
            println!("{}", serde_json::to_string(&entries)?);
            Ok(())
        }

        Command::MatchIp { ip, allowlist } => {
            let entries = gateway_ip_allowlist::parse(&allowlist)?;
            let matched = gateway_ip_allowlist::matches(&ip, &entries);
            println!("{}", serde_json::json!({"matches": matched}));
            Ok(())
        }

        Command::CheckCommand { command } => {
            let blocked = gateway_command_blocklist::check(&command);
            let suspicious = gateway_command_blocklist::suspicious(&command);
            println!("{}", serde_json::json!({"blocked": blocked, "suspicious": suspicious}));
            Ok(())
        }

        Command::RedactText { text } => {
            let engine = gateway_redaction::RedactionEngine::new(&gateway_redaction::RedactionConfig::default())
                .expect("default redaction config always compiles");
            println!("{}", engine.redact_text(&text));
            Ok(())
        }

        Command::CheckFs { skill_id, base_dir, mode, op, path } => {
            let fs = gateway_sandbox::FilesystemPolicy { mode: mode.into(), ..Default::default() };
            let overrides = PermissionOverrides { filesystem: Some(fs), ..Default::default() };
            let policy = gateway_sandbox::create_policy(&skill_id, overrides, &base_dir);
            let decision = gateway_sandbox::check_fs(&policy, path.to_string_lossy().as_ref(), op.into());
            println!("{}", serde_json::to_string(&decision)?);
            Ok(())
        }

        Command::CheckNet { skill_id, base_dir, egress, egress_allowlist, op, hostname } => {
            let network = gateway_sandbox::NetworkPolicy {
                egress: egress.into(),
                egress_allowlist,
                listen: matches!(op, NetOpArg::Listen),
            };
            let overrides = PermissionOverrides { network: Some(network), ..Default::default() };
            let policy = gateway_sandbox::create_policy(&skill_id, overrides, &base_dir);
            let decision = gateway_sandbox::check_net(&policy, &hostname, op.into());
            println!("{}", serde_json::to_string(&decision)?);
            Ok(())
        }

        Command::CheckSub { skill_id, base_dir, allow_subprocess, command, args } => {
            let subprocess = gateway_sandbox::SubprocessPolicy { allowed: allow_subprocess, ..Default::default() };
            let overrides = PermissionOverrides { subprocess: Some(subprocess), ..Default::default() };
            let policy = gateway_sandbox::create_policy(&skill_id, overrides, &base_dir);
            let decision = gateway_sandbox::check_sub(&policy, &command, &args);
            println!("{}", serde_json::to_string(&decision)?);
            Ok(())
        }

        Command::StripIdentity { payload_json } => {
            let bytes = std::fs::read(&payload_json)?;
            let payload: gateway_common::Value = serde_json::from_slice(&bytes)?;
            let (sanitized, result, _events) = gateway_identity::strip(&payload, true);
            println!("{}", serde_json::json!({"sanitized": sanitized, "result": result}));
            Ok(())
        }
    }
}
