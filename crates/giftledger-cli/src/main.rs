// Giftledger CLI - operator tooling for the settlement API

mod client;
mod fields;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{json, Value};
use uuid::Uuid;

use client::{ApiClient, Reply};

const WEBHOOK_PATH: &str = "/api/v1/webhooks/stripe";

/// Giftledger - gift codes, webhook signing and ledger administration
#[derive(Parser)]
#[command(name = "giftledger")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Base URL of the settlement API
    #[arg(long, global = true, env = "GIFTLEDGER_SERVER", default_value = "http://localhost:8080")]
    server: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Work with gift codes offline
    Code {
        #[command(subcommand)]
        action: CodeAction,
    },
    /// Sign and deliver payment provider webhooks
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// Call the admin API
    Admin {
        /// Admin bearer token
        #[arg(long, global = true, env = "GIFTLEDGER_ADMIN_API_TOKEN", hide_env_values = true)]
        token: Option<String>,

        #[command(subcommand)]
        action: AdminAction,
    },
}

#[derive(Subcommand)]
enum CodeAction {
    /// Print the canonical form of a code
    Normalize { code: String },
    /// Print the lookup hash stored for a code
    Hash {
        code: String,

        #[arg(long, env = "GIFTLEDGER_GIFT_CARD_PEPPER", hide_env_values = true)]
        pepper: String,
    },
    /// Generate fresh codes
    Generate {
        #[arg(short = 'n', long, default_value_t = 1)]
        count: u32,

        /// Also print each code's lookup hash
        #[arg(long, env = "GIFTLEDGER_GIFT_CARD_PEPPER", hide_env_values = true)]
        pepper: Option<String>,
    },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Print the signature header for a payload file
    Sign {
        /// Path to the JSON payload
        path: String,

        #[arg(long, env = "GIFTLEDGER_STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,

        /// Unix timestamp to sign with (defaults to now)
        #[arg(long)]
        timestamp: Option<i64>,
    },
    /// Sign a payload file and post it to the server
    Send {
        path: String,

        #[arg(long, env = "GIFTLEDGER_STRIPE_WEBHOOK_SECRET", hide_env_values = true)]
        secret: String,
    },
}

#[derive(Subcommand)]
enum AdminAction {
    /// Apply a signed balance correction to a gift card
    Adjust {
        gift_card_id: Uuid,

        /// Signed amount in cents, e.g. -500
        #[arg(long, allow_hyphen_values = true)]
        delta: i64,

        #[arg(long)]
        note: Option<String>,

        /// Operator name recorded on the ledger entry
        #[arg(long)]
        actor: Option<String>,
    },
    /// Set a gift card's status (active or disabled)
    Status { gift_card_id: Uuid, status: String },
    /// Show a gift card's ledger reconciliation and entries
    Audit { gift_card_id: Uuid },
    /// Release every lapsed reservation now
    Sweep,
    /// Merge fields into an order's fulfillment data
    Fulfill {
        order_id: Uuid,

        /// Field to set (can be specified multiple times)
        #[arg(short, long = "set", value_name = "KEY=VALUE", required = true)]
        set: Vec<String>,
    },
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Code { action } => handle_code(action),
        Commands::Webhook { action } => handle_webhook(&cli.server, action),
        Commands::Admin { token, action } => handle_admin(ApiClient::new(&cli.server, token), action),
    };

    if let Err(e) = result {
        eprintln!("{} {}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn handle_code(action: CodeAction) -> anyhow::Result<()> {
    match action {
        CodeAction::Normalize { code } => {
            let normalized = giftledger_crypto::normalize_gift_code(&code);
            if normalized.is_empty() {
                return Err(anyhow!("'{}' contains no code characters", code));
            }
            println!("{}", normalized);
        }
        CodeAction::Hash { code, pepper } => {
            println!("{}", giftledger_crypto::lookup_hash(&code, &pepper));
        }
        CodeAction::Generate { count, pepper } => {
            for _ in 0..count {
                let code = giftledger_crypto::generate_gift_code();
                match pepper.as_deref() {
                    Some(pepper) => println!("{}  {}", code, giftledger_crypto::lookup_hash(&code, pepper)),
                    None => println!("{}", code),
                }
            }
        }
    }
    Ok(())
}

fn read_payload(path: &str) -> anyhow::Result<String> {
    let payload =
        std::fs::read_to_string(path).with_context(|| format!("Failed to read '{}'", path))?;
    serde_json::from_str::<Value>(&payload)
        .with_context(|| format!("'{}' is not valid JSON", path))?;
    Ok(payload)
}

fn handle_webhook(server: &str, action: WebhookAction) -> anyhow::Result<()> {
    match action {
        WebhookAction::Sign { path, secret, timestamp } => {
            let payload = read_payload(&path)?;
            let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());
            println!(
                "{}",
                giftledger_crypto::signature_header(&secret, timestamp, payload.as_bytes())?
            );
            Ok(())
        }
        WebhookAction::Send { path, secret } => {
            let payload = read_payload(&path)?;
            let header = giftledger_crypto::signature_header(
                &secret,
                chrono::Utc::now().timestamp(),
                payload.as_bytes(),
            )?;
            let client = ApiClient::new(server, None);
            let reply = client.webhook(WEBHOOK_PATH, &payload, &header)?;
            print_reply(&reply);
            ensure_success(&reply)
        }
    }
}

fn handle_admin(client: ApiClient, action: AdminAction) -> anyhow::Result<()> {
    let reply = match action {
        AdminAction::Adjust { gift_card_id, delta, note, actor } => {
            if delta == 0 {
                return Err(anyhow!("--delta must be non-zero"));
            }
            let body = json!({ "deltaCents": delta, "note": note, "actor": actor });
            client.admin("POST", &format!("/api/v1/admin/gift-cards/{}/adjust", gift_card_id), Some(&body))?
        }
        AdminAction::Status { gift_card_id, status } => {
            let body = json!({ "status": status });
            client.admin("POST", &format!("/api/v1/admin/gift-cards/{}/status", gift_card_id), Some(&body))?
        }
        AdminAction::Audit { gift_card_id } => {
            let reply = client.admin("GET", &format!("/api/v1/admin/gift-cards/{}/audit", gift_card_id), None)?;
            if reply.is_success() {
                if let Some(audit) = reply.json() {
                    print_audit(&audit);
                    return Ok(());
                }
            }
            reply
        }
        AdminAction::Sweep => client.admin("POST", "/api/v1/admin/reservations/sweep", None)?,
        AdminAction::Fulfill { order_id, set } => {
            let patch = fields::parse_fields(&set)?;
            client.admin("PATCH", &format!("/api/v1/admin/orders/{}/fulfillment", order_id), Some(&patch))?
        }
    };

    print_reply(&reply);
    ensure_success(&reply)
}

fn print_reply(reply: &Reply) {
    let body = match reply.json() {
        Some(value) => serde_json::to_string_pretty(&value).unwrap_or_else(|_| reply.body.clone()),
        None => reply.body.clone(),
    };
    if reply.is_success() {
        println!("{} {}", "✓".green().bold(), reply.status.to_string().green());
        println!("{}", body);
    } else {
        eprintln!("{} {}", "✗".red().bold(), reply.status.to_string().red());
        eprintln!("{}", body);
    }
}

fn ensure_success(reply: &Reply) -> anyhow::Result<()> {
    if reply.is_success() {
        return Ok(());
    }
    let code = reply
        .json()
        .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| reply.body.trim().to_string());
    Err(anyhow!("server answered {} ({})", reply.status, code))
}

/// Prints the reconciliation summary followed by one line per entry.
fn print_audit(audit: &Value) {
    let consistent = audit["consistent"].as_bool().unwrap_or(false);
    let verdict = if consistent {
        "consistent".green().bold()
    } else {
        "MISMATCH".red().bold()
    };
    println!("Gift card {}  {}", audit["gift_card_id"].as_str().unwrap_or("?"), verdict);
    println!();
    println!("  Initial:      {}", cents(&audit["initial_amount_cents"]));
    println!("  Remaining:    {}", cents(&audit["remaining_amount_cents"]));
    println!("  Ledger sum:   {}", cents(&audit["ledger_sum_cents"]));
    println!("  Active holds: {}", cents(&audit["active_holds_cents"]));
    println!();

    let entries = audit["entries"].as_array().cloned().unwrap_or_default();
    println!("  Entries ({}):", entries.len());
    for entry in &entries {
        println!(
            "    {}  {:<8} {:>10}  {}{}",
            entry["created_at"].as_str().unwrap_or(""),
            entry["entry_type"].as_str().unwrap_or("?"),
            cents(&entry["amount_cents"]),
            entry["actor"].as_str().unwrap_or("-"),
            entry["note"]
                .as_str()
                .map(|n| format!("  ({})", n))
                .unwrap_or_default(),
        );
    }
}

fn cents(value: &Value) -> String {
    match value.as_i64() {
        Some(v) => {
            let sign = if v < 0 { "-" } else { "" };
            format!("{}{}.{:02}", sign, v.abs() / 100, v.abs() % 100)
        }
        None => "?".to_string(),
    }
}
