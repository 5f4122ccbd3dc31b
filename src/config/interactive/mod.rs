
use anyhow::{Context, Result};
use console::style;
use dialoguer::{Confirm, Input, Password, Select};
use std::path::Path;
use std::time::Duration;

use super::{Config, ConfigError, LimitsConfig, OllamaConfig, WhatsAppConfig};
use crate::embeddings::OllamaClient;

const PROTOCOLS: [&str; 2] = ["http", "https"];

/// Walk through every section, probe Ollama, then offer to save
#[inline]
pub fn run_interactive_config(config_dir: &Path) -> Result<()> {
    eprintln!("{}", style("🔧 Storebot Configuration Setup").bold().cyan());
    eprintln!();

    let mut config = load_existing_config(config_dir)?;

    section("Ollama", "Embeddings and chat completions are served by Ollama.");
    configure_ollama(&mut config.ollama)?;

    section("HTTP server", "Where the widget API listens.");
    configure_server(&mut config)?;

    section("Free plan", "Paid tenants are never limited.");
    configure_limits(&mut config.limits)?;

    section("WhatsApp", "Optional Twilio webhook bound to a single tenant.");
    config.whatsapp = configure_whatsapp(config.whatsapp.take())?;

    eprintln!();
    eprintln!("{}", style("Probing Ollama...").yellow());
    match probe_ollama(&config.ollama) {
        Some(version) => eprintln!(
            "{}",
            style(format!("✓ Ollama {version} is reachable")).green()
        ),
        None => {
            eprintln!("{}", style("⚠ Ollama did not answer").yellow());
            eprintln!("Start Ollama before running 'storebot serve'.");
        }
    }

    eprintln!();
    let save = Confirm::new()
        .with_prompt("Write these settings?")
        .default(true)
        .interact()?;
    if !save {
        eprintln!("Nothing written.");
        return Ok(());
    }

    config.save().context("Failed to save configuration")?;
    eprintln!(
        "{} {}",
        style("✓ Saved to").green(),
        style(config.config_file_path().display()).cyan()
    );
    Ok(())
}

#[inline]
pub fn show_config(config_dir: &Path) -> Result<()> {
    let config = Config::load(config_dir).context("Failed to load configuration")?;

    eprintln!("{}", style("📋 Current Configuration").bold().cyan());

    heading("Ollama");
    match config.ollama_url() {
        Ok(url) => field("URL", url),
        Err(e) => eprintln!("  URL: {} ({})", style("invalid").red(), e),
    }
    field(
        "Embedding model",
        format!(
            "{} ({} dims)",
            config.ollama.embedding_model, config.ollama.embedding_dimension
        ),
    );
    field("Chat model", &config.ollama.chat_model);
    field("Timeout", format!("{}s", config.ollama.timeout_seconds));

    heading("Server");
    field("Listen", config.server_address());

    heading("Free plan");
    field("Questions", config.limits.free_question_limit);
    field("Uploads", config.limits.free_upload_limit);

    heading("Retrieval");
    field("Top K", config.retrieval.top_k);
    field("Snippet chars", config.retrieval.snippet_chars);
    field("History turns", config.retrieval.history_turns);
    field("Text window", config.retrieval.text_chunk_chars);
    field(
        "Call timeout",
        format!("{}s", config.retrieval.call_timeout_seconds),
    );

    heading("WhatsApp");
    match &config.whatsapp {
        Some(whatsapp) => {
            field("From", &whatsapp.from_number);
            field("Tenant", &whatsapp.tenant_id);
        }
        None => eprintln!("  {}", style("disabled").dim()),
    }

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );
    Ok(())
}

fn section(title: &str, blurb: &str) {
    eprintln!();
    eprintln!("{}", style(title).bold().yellow());
    eprintln!("{blurb}");
}

fn heading(title: &str) {
    eprintln!();
    eprintln!("{}", style(format!("{title}:")).bold().yellow());
}

fn field(label: &str, value: impl std::fmt::Display) {
    eprintln!("  {}: {}", label, style(value).cyan());
}

fn load_existing_config(config_dir: &Path) -> Result<Config> {
    match Config::load(config_dir) {
        Ok(config) => {
            if config.config_file_path().exists() {
                eprintln!("{}", style("Editing existing configuration.").green());
            }
            Ok(config)
        }
        Err(e) => {
            eprintln!(
                "{}",
                style(format!("Ignoring unusable configuration ({e:#}); starting from defaults."))
                    .yellow()
            );
            Ok(Config {
                base_dir: config_dir.to_path_buf(),
                ..Config::default()
            })
        }
    }
}

fn configure_ollama(ollama: &mut OllamaConfig) -> Result<()> {
    let current = PROTOCOLS
        .iter()
        .position(|p| *p == ollama.protocol)
        .unwrap_or(0);
    let protocol = PROTOCOLS[Select::new()
        .with_prompt("Protocol")
        .default(current)
        .items(&PROTOCOLS)
        .interact()?]
    .to_string();

    let host: String = Input::new()
        .with_prompt("Host")
        .default(ollama.host.clone())
        .validate_with(|input: &String| -> Result<(), ConfigError> {
            OllamaConfig {
                protocol: protocol.clone(),
                host: input.clone(),
                ..ollama.clone()
            }
            .ollama_url()
            .map(|_| ())
        })
        .interact_text()?;
    let port: u16 = Input::new()
        .with_prompt("Port")
        .default(ollama.port)
        .validate_with(positive_port)
        .interact_text()?;
    let embedding_model: String = Input::new()
        .with_prompt("Embedding model")
        .default(ollama.embedding_model.clone())
        .validate_with(non_empty)
        .interact_text()?;
    let embedding_dimension: u32 = Input::new()
        .with_prompt("Embedding dimension")
        .default(ollama.embedding_dimension)
        .validate_with(|input: &u32| -> Result<(), ConfigError> {
            OllamaConfig::default().set_embedding_dimension(*input)
        })
        .interact_text()?;
    let chat_model: String = Input::new()
        .with_prompt("Chat model")
        .default(ollama.chat_model.clone())
        .validate_with(non_empty)
        .interact_text()?;

    ollama.set_protocol(protocol)?;
    ollama.set_host(host)?;
    ollama.set_port(port)?;
    ollama.set_embedding_model(embedding_model)?;
    ollama.set_embedding_dimension(embedding_dimension)?;
    ollama.set_chat_model(chat_model)?;
    Ok(())
}

fn configure_server(config: &mut Config) -> Result<()> {
    config.server.host = Input::new()
        .with_prompt("Listen address")
        .default(config.server.host.clone())
        .validate_with(non_empty)
        .interact_text()?;
    config.server.port = Input::new()
        .with_prompt("Listen port")
        .default(config.server.port)
        .validate_with(positive_port)
        .interact_text()?;
    Ok(())
}

fn configure_limits(limits: &mut LimitsConfig) -> Result<()> {
    limits.free_question_limit = Input::new()
        .with_prompt("Questions per free tenant")
        .default(limits.free_question_limit)
        .validate_with(non_negative)
        .interact_text()?;
    limits.free_upload_limit = Input::new()
        .with_prompt("Uploads per free tenant")
        .default(limits.free_upload_limit)
        .validate_with(non_negative)
        .interact_text()?;
    Ok(())
}

fn configure_whatsapp(current: Option<WhatsAppConfig>) -> Result<Option<WhatsAppConfig>> {
    let enable = Confirm::new()
        .with_prompt("Answer WhatsApp messages?")
        .default(current.is_some())
        .interact()?;
    if !enable {
        return Ok(None);
    }

    let previous = current.unwrap_or_else(|| WhatsAppConfig {
        account_sid: String::new(),
        auth_token: String::new(),
        from_number: String::new(),
        tenant_id: String::new(),
        api_base: super::settings::default_twilio_api_base(),
    });

    let account_sid: String = Input::new()
        .with_prompt("Twilio account SID")
        .with_initial_text(previous.account_sid.clone())
        .validate_with(non_empty)
        .interact_text()?;
    let entered_token = Password::new()
        .with_prompt("Twilio auth token (blank keeps the current one)")
        .allow_empty_password(true)
        .interact()?;
    let auth_token = if entered_token.trim().is_empty() {
        previous.auth_token.clone()
    } else {
        entered_token
    };
    let from_number: String = Input::new()
        .with_prompt("Sender number")
        .with_initial_text(previous.from_number.clone())
        .validate_with(non_empty)
        .interact_text()?;
    let tenant_id: String = Input::new()
        .with_prompt("Tenant ID answering WhatsApp")
        .with_initial_text(previous.tenant_id.clone())
        .validate_with(non_empty)
        .interact_text()?;

    let whatsapp = WhatsAppConfig {
        account_sid,
        auth_token,
        from_number,
        tenant_id,
        api_base: previous.api_base,
    };
    whatsapp.validate()?;
    Ok(Some(whatsapp))
}

#[allow(clippy::ptr_arg, reason = "dialoguer validators receive &String")]
fn non_empty(input: &String) -> Result<(), &'static str> {
    if input.trim().is_empty() {
        Err("Value cannot be empty")
    } else {
        Ok(())
    }
}

fn positive_port(input: &u16) -> Result<(), &'static str> {
    if *input == 0 {
        Err("Port must be greater than 0")
    } else {
        Ok(())
    }
}

fn non_negative(input: &i64) -> Result<(), &'static str> {
    if *input < 0 {
        Err("Limit cannot be negative")
    } else {
        Ok(())
    }
}

fn probe_ollama(ollama: &OllamaConfig) -> Option<String> {
    OllamaClient::new(ollama)
        .ok()?
        .with_timeout(Duration::from_secs(5))
        .with_retry_attempts(1)
        .ping()
        .ok()
}
