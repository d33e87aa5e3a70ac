//! Command handlers for sppilot CLI

use crate::wizard::run_init_wizard;
use anyhow::{Context as _, Result};
use clap::Command;
use clap_complete::{generate, Shell as ClapShell};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use sppilot_core::{
    get_config_path, load_config_from, validate_config, ConfigFile, CopyReport, CopySpec,
    ListOptions, LoggingConfig, RemoteFileEntry, SharePointClient,
};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;

/// Global options shared by every command
#[derive(Debug, Clone)]
pub struct Context {
    config_path: Option<PathBuf>,
    site: Option<String>,
}

impl Context {
    pub fn new(config_path: Option<PathBuf>, site: Option<String>) -> Self {
        Self { config_path, site }
    }

    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Ok(get_config_path()?),
        }
    }

    pub fn load(&self) -> Result<ConfigFile> {
        Ok(load_config_from(&self.config_path()?)?)
    }

    /// Logging section, or defaults when there is no readable configuration.
    pub fn logging_config(&self) -> LoggingConfig {
        self.load().map(|c| c.logging()).unwrap_or_default()
    }

    /// Client for the selected site.
    pub fn client(&self) -> Result<SharePointClient> {
        let config = self.load()?;
        let name = config.site_name(self.site.as_deref())?;
        let credentials = config
            .site(name)
            .with_context(|| format!("Invalid credentials for site '{}'", name))?;
        tracing::debug!(site = name, url = %credentials.site_url(), "Using site");
        Ok(SharePointClient::new(credentials, config.client_options())?)
    }
}

/// Handle init command
pub async fn handle_init(ctx: &Context) -> Result<()> {
    run_init_wizard(&ctx.config_path()?).await
}

/// Handle config commands
pub async fn handle_config(ctx: &Context, action: &str) -> Result<()> {
    match action {
        "show" => {
            let config = ctx.load()?;

            println!("Current configuration:");
            println!();
            println!(
                "Default site: {}",
                config.default_site.as_deref().unwrap_or("(none)")
            );

            for (name, site) in &config.sites {
                println!();
                println!("Site '{}':", name);
                println!("  URL: {}", site.site_url());
                println!("  Tenant ID: {}", site.tenant_id);
                println!("  Client ID: {}", site.client_id);
                println!("  Client secret: {}", mask_secret(&site.client_secret));
            }

            let options = config.client_options();
            println!();
            println!("Advanced:");
            println!("  Timeout: {}s", options.timeout.as_secs());
            println!("  Download timeout: {}s", options.download_timeout.as_secs());
            println!("  Max retries: {}", options.max_retries);
            println!("  Concurrent downloads: {}", options.max_concurrent_downloads);

            Ok(())
        }
        "validate" => {
            println!("Validating configuration...");

            let config = ctx.load()?;
            validate_config(&config)?;
            println!("  ✅ Valid configuration format");

            println!("  Requesting an access token...");
            let client = ctx.client()?;
            client.authenticate().await?;
            println!("  ✅ Credentials accepted for {}", client.credentials().site_url());

            Ok(())
        }
        "edit" => {
            let config_path = ctx.config_path()?;
            println!("Opening editor...");
            println!("  File: {}", config_path.display());
            println!();

            let editor = std::env::var("EDITOR").unwrap_or_else(|_| "vi".to_string());
            let status = std::process::Command::new(editor)
                .arg(&config_path)
                .status()?;

            if status.success() {
                println!("  ✅ Configuration edited");

                // Validate after edit
                let config = ctx.load()?;
                validate_config(&config)?;
                println!("  ✅ Configuration valid");
            } else {
                println!("  ⚠️  Editor exited with error");
            }

            Ok(())
        }
        "path" => {
            println!("{}", ctx.config_path()?.display());
            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: show, edit, validate, path");
            Ok(())
        }
    }
}

/// Handle sites commands
pub async fn handle_sites(ctx: &Context, action: &str) -> Result<()> {
    if action != "list" {
        println!("Unknown action: {}", action);
        println!("Available actions: list");
        return Ok(());
    }

    let config = ctx.load()?;
    if config.sites.is_empty() {
        println!("  No sites configured (run 'sppilot init')");
        return Ok(());
    }

    #[derive(Tabled)]
    struct SiteRow {
        name: String,
        url: String,
        client_id: String,
        default: String,
    }

    let rows: Vec<SiteRow> = config
        .sites
        .iter()
        .map(|(name, site)| SiteRow {
            name: name.clone(),
            url: site.site_url(),
            client_id: site.client_id.clone(),
            default: if config.default_site.as_deref() == Some(name.as_str()) {
                "✓".to_string()
            } else {
                String::new()
            },
        })
        .collect();

    println!("{}", Table::new(rows));
    Ok(())
}

fn list_options(recursive: bool, max_depth: Option<usize>) -> ListOptions {
    let options = if recursive {
        ListOptions::default()
    } else {
        ListOptions::shallow()
    };
    match max_depth {
        Some(depth) => options.with_max_depth(depth),
        None => options,
    }
}

/// Handle `files ls`
pub async fn handle_ls(
    ctx: &Context,
    folder: &str,
    recursive: bool,
    max_depth: Option<usize>,
    output: &str,
) -> Result<()> {
    let client = ctx.client()?;
    let entries = client
        .collect_files(folder, list_options(recursive, max_depth))
        .await?;

    match output {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            println!("Listing {}...", client.credentials().resolve_path(folder));

            if entries.is_empty() {
                println!("  No files found");
                return Ok(());
            }

            let rows: Vec<FileRow> = entries.iter().map(FileRow::from).collect();
            println!();
            println!("{}", Table::new(rows));
            println!();
            println!(
                "  {} file(s), {}",
                entries.len(),
                format_bytes(entries.iter().map(|e| e.size).sum())
            );
        }
    }

    Ok(())
}

#[derive(Tabled)]
struct FileRow {
    path: String,
    size: String,
    modified: String,
}

impl From<&RemoteFileEntry> for FileRow {
    fn from(entry: &RemoteFileEntry) -> Self {
        Self {
            path: entry.relative_path.clone(),
            size: format_bytes(entry.size),
            modified: entry
                .last_modified
                .map(|d| format_date(&d.to_rfc3339()))
                .unwrap_or_else(|| "-".to_string()),
        }
    }
}

/// Handle `files download`
pub async fn handle_download(ctx: &Context, path: &str, dest: &Path) -> Result<()> {
    let client = ctx.client()?;

    println!("Downloading {} -> {}...", path, dest.display());
    let bytes = client.download_path(path, dest).await?;
    println!("  ✅ Download complete ({})", format_bytes(bytes));

    Ok(())
}

/// Handle `files copy`
pub async fn handle_copy(
    ctx: &Context,
    folder: &str,
    dest: &Path,
    flatten: bool,
    concurrency: Option<usize>,
    max_depth: Option<usize>,
) -> Result<()> {
    let config = ctx.load()?;
    let name = config.site_name(ctx.site.as_deref())?;
    let mut options = config.client_options();
    if let Some(concurrency) = concurrency {
        options.max_concurrent_downloads = concurrency.max(1);
    }
    let client = SharePointClient::new(config.site(name)?, options)?;

    let pb = spinner(format!("Listing {}...", folder));
    let entries = client
        .collect_files(folder, list_options(true, max_depth))
        .await;
    let entries = match entries {
        Ok(entries) => entries,
        Err(e) => {
            pb.finish_and_clear();
            return Err(e.into());
        }
    };

    // Ctrl-C stops scheduling new downloads
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    pb.set_message(format!(
        "Copying {} file(s) to {}...",
        entries.len(),
        dest.display()
    ));
    let spec = CopySpec::new(entries, dest).flatten(flatten);
    let report = client.copy_files_with_cancel(spec, &cancel).await;
    interrupt.abort();
    pb.finish_and_clear();

    print_report(&report);

    if cancel.is_cancelled() {
        return Err(anyhow::anyhow!("Copy interrupted"));
    }
    if !report.is_success() {
        return Err(anyhow::anyhow!(
            "{} of {} file(s) failed",
            report.failed_count(),
            report.failed_count() + report.succeeded_count()
        ));
    }

    Ok(())
}

fn print_report(report: &CopyReport) {
    for copied in &report.succeeded {
        println!(
            "  ✅ {} -> {}",
            copied.entry.relative_path,
            copied.destination.display()
        );
    }
    for skipped in &report.skipped {
        println!(
            "  ⚠️  {} skipped ({})",
            skipped.entry.relative_path, skipped.reason
        );
    }
    for failed in &report.failed {
        println!(
            "  {} {}: {}",
            style("❌").red(),
            failed.entry.relative_path,
            failed.error
        );
    }

    println!();
    println!(
        "  {} copied ({}), {} failed, {} skipped",
        report.succeeded_count(),
        format_bytes(report.total_bytes()),
        report.failed_count(),
        report.skipped_count()
    );
}

/// Handle `files move`
pub async fn handle_move(ctx: &Context, file: &str, target: &str, overwrite: bool) -> Result<()> {
    let client = ctx.client()?;

    println!("Moving {} -> {}...", file, target);
    let moved_to = client.move_file(file, target, overwrite).await?;
    println!("  ✅ Moved to {}", moved_to);

    Ok(())
}

/// Handle folders commands
pub async fn handle_folders(ctx: &Context, action: &str, folder: &str) -> Result<()> {
    let client = ctx.client()?;

    match action {
        "exists" => {
            if client.folder_exists(folder).await? {
                println!("  ✅ {} exists", folder);
            } else {
                println!("  ⚠️  {} does not exist", folder);
            }
            Ok(())
        }
        "create" => {
            if client.create_folder(folder).await? {
                println!("  ✅ Folder created: {}", folder);
            } else {
                println!("  Folder already exists: {}", folder);
            }
            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: exists, create");
            Ok(())
        }
    }
}

/// Handle doctor commands
pub async fn handle_doctor(ctx: &Context, action: &str) -> Result<()> {
    match action {
        "check" => {
            println!("Checking sppilot installation...");

            println!("  ✅ sppilot is installed");
            println!("  Version: {}", env!("CARGO_PKG_VERSION"));

            // Check config
            let config_path = ctx.config_path()?;
            if config_path.exists() {
                println!("  ✅ Configuration found");

                let config = ctx.load()?;
                validate_config(&config)?;
                println!("  ✅ Configuration valid ({} site(s))", config.sites.len());
            } else {
                println!("  ⚠️  Configuration not found (run 'sppilot init')");
            }

            Ok(())
        }
        "test-connection" => {
            println!("Testing SharePoint connection...");

            let client = ctx.client()?;
            println!("  Site: {}", client.credentials().site_url());

            client
                .authenticate()
                .await
                .context("Token request failed")?;
            println!("  ✅ Access token acquired");

            client
                .collect_files("/", ListOptions::shallow())
                .await
                .context("Site root listing failed")?;
            println!("  ✅ Site reachable");

            println!();
            println!("  ✅ All connections are working!");

            Ok(())
        }
        _ => {
            println!("Unknown action: {}", action);
            println!("Available actions: check, test-connection");
            Ok(())
        }
    }
}

fn spinner(message: String) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} [{elapsed_precise}] {msg}") {
        pb.set_style(style);
    }
    pb.set_message(message);
    pb.enable_steady_tick(Duration::from_millis(120));
    pb
}

/// `abcd…wxyz` for secrets longer than 8 characters
fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() <= 8 {
        return "********".to_string();
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}…{}", head, tail)
}

/// Format bytes to human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format ISO date string to readable format
fn format_date(iso_date: &str) -> String {
    match chrono::DateTime::parse_from_rfc3339(iso_date) {
        Ok(dt) => dt.format("%Y-%m-%d %H:%M").to_string(),
        Err(_) => iso_date.to_string(),
    }
}

/// Handle shell completion generation
pub async fn handle_completion(shell: &str, cmd: &mut Command) -> Result<()> {
    use std::io;

    let clap_shell = match shell {
        "bash" => ClapShell::Bash,
        "zsh" => ClapShell::Zsh,
        "fish" => ClapShell::Fish,
        "elvish" => ClapShell::Elvish,
        "powershell" | "pwsh" => ClapShell::PowerShell,
        _ => {
            return Err(anyhow::anyhow!(
                "Unsupported shell: {}\nSupported shells: bash, zsh, fish, elvish, powershell",
                shell
            ));
        }
    };

    // Script on stdout, hints on stderr so `source <(...)` works
    generate(clap_shell, cmd, "sppilot", &mut io::stdout());

    eprintln!();
    eprintln!("Installation instructions:");
    match shell {
        "bash" => {
            eprintln!("  source <(sppilot completion bash)");
            eprintln!("  sppilot completion bash > ~/.local/share/bash-completion/completions/sppilot");
        }
        "zsh" => {
            eprintln!("  sppilot completion zsh > ~/.zsh/completion/_sppilot");
            eprintln!("  # then add to ~/.zshrc:");
            eprintln!("  fpath=(~/.zsh/completion $fpath)");
            eprintln!("  autoload -U compinit && compinit");
        }
        "fish" => {
            eprintln!("  sppilot completion fish > ~/.config/fish/completions/sppilot.fish");
        }
        "elvish" => {
            eprintln!("  sppilot completion elvish > ~/.elvish/lib/sppilot.elv");
        }
        _ => {
            eprintln!("  sppilot completion powershell | Out-String | Invoke-Expression");
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1536), "1.50 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_date() {
        assert_eq!(format_date("2024-05-01T08:30:00Z"), "2024-05-01 08:30");
        assert_eq!(format_date("not a date"), "not a date");
    }

    #[test]
    fn test_mask_secret() {
        assert_eq!(mask_secret("short"), "********");
        assert_eq!(mask_secret("abcdefghijklmnop"), "abcd…mnop");
    }

    #[test]
    fn test_list_options() {
        assert_eq!(list_options(true, None), ListOptions::default());
        assert!(!list_options(false, None).recursive);
        assert_eq!(list_options(true, Some(2)).max_depth, Some(2));
    }
}
