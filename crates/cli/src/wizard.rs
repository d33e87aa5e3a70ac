//! Interactive setup wizard for sppilot configuration

use anyhow::Result;
use dialoguer::{theme::ColorfulTheme, Confirm, Input, Password};
use indicatif::{ProgressBar, ProgressStyle};
use sppilot_core::{load_config_from, save_config_to, ConfigFile, SiteConfig, SiteCredentials};
use std::path::Path;

/// Run the interactive setup wizard, adding (or replacing) one site profile
pub async fn run_init_wizard(config_path: &Path) -> Result<()> {
    println!("🚀 Welcome to sppilot setup!\n");

    println!("This wizard will guide you through the configuration process.");
    println!("You will need an app-only principal registered on the site");
    println!("(/_layouts/15/appregnew.aspx) and granted access to it:");
    println!("  1. The site URL");
    println!("  2. Your Azure AD tenant ID");
    println!("  3. The app's client ID and client secret\n");

    let mut config = if config_path.exists() {
        load_config_from(config_path)?
    } else {
        ConfigFile::default()
    };

    // Step 1: Site URL
    let site_url = prompt_site_url()?;

    // Step 2: Tenant and client
    let tenant_id = prompt_guid("Tenant ID")?;
    let client_id = prompt_guid("Client ID")?;
    let client_secret = Password::with_theme(&ColorfulTheme::default())
        .with_prompt("Client secret")
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.trim().is_empty() {
                Err("Client secret cannot be empty")
            } else {
                Ok(())
            }
        })
        .interact()
        .map_err(|e| anyhow::anyhow!("Failed to get client secret: {}", e))?;

    let credentials =
        SiteCredentials::from_site_url(&site_url, &tenant_id, &client_id, &client_secret)?;

    // Step 3: Profile name
    let name = prompt_profile_name(&config, credentials.site_path())?;

    if config.sites.contains_key(&name) {
        let replace = Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(format!("Site '{}' already exists. Replace it?", name))
            .default(false)
            .interact()?;
        if !replace {
            println!("❌ Configuration cancelled");
            return Ok(());
        }
    }

    // Summary
    println!("\n📋 Configuration summary:");
    println!("  Profile: {}", name);
    println!("  Site: {}", credentials.site_url());
    println!("  Tenant ID: {}", credentials.tenant_id());
    println!("  Client ID: {}", credentials.client_id());

    let confirm = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt("Save this configuration?")
        .default(false)
        .interact()?;

    if !confirm {
        println!("❌ Configuration cancelled");
        return Ok(());
    }

    config.sites.insert(
        name.clone(),
        SiteConfig {
            host: credentials.host().to_string(),
            site_path: credentials.site_path().to_string(),
            tenant_id: credentials.tenant_id().to_string(),
            client_id: credentials.client_id().to_string(),
            client_secret,
        },
    );
    if config.default_site.is_none() {
        config.default_site = Some(name.clone());
    }

    // Save config
    let pb = ProgressBar::new(1);
    pb.set_style(
        ProgressStyle::default_bar().template("{spinner:.green} [{elapsed_precise}] {msg}")?,
    );
    pb.set_message("Saving configuration...");

    save_config_to(&config, config_path)?;

    pb.inc(1);
    pb.finish_with_message("✅ Configuration saved!");

    println!("\n🎉 Setup complete!");
    println!("\nConfiguration saved to: {}", config_path.display());
    println!("\nYou can now use sppilot:");
    println!("  $ sppilot config validate");
    println!("  $ sppilot --site {} files ls \"/Shared Documents\"", name);
    println!("  $ sppilot files copy \"/Shared Documents/Reports\" ./reports --flatten");

    Ok(())
}

/// Prompt for the site URL
fn prompt_site_url() -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Site URL")
        .with_initial_text("https://")
        .validate_with(|input: &String| -> Result<(), &str> {
            match url::Url::parse(input.trim()) {
                Ok(url) if url.scheme() == "https" && url.host_str().is_some() => Ok(()),
                Ok(_) => Err("Site URL must be an https:// URL"),
                Err(_) => Err("Invalid URL (e.g. https://contoso.sharepoint.com/sites/MyTeamSite)"),
            }
        })
        .interact_text()
        .map(|s| s.trim().to_string())
        .map_err(|e| anyhow::anyhow!("Failed to get site URL: {}", e))
}

/// Prompt for a GUID-shaped identifier
fn prompt_guid(label: &str) -> Result<String> {
    Input::with_theme(&ColorfulTheme::default())
        .with_prompt(label)
        .validate_with(|input: &String| -> Result<(), &str> {
            let groups: Vec<&str> = input.trim().split('-').collect();
            let shaped = groups.len() == 5
                && groups
                    .iter()
                    .zip([8, 4, 4, 4, 12])
                    .all(|(g, len)| g.len() == len && g.chars().all(|c| c.is_ascii_hexdigit()));
            if shaped {
                Ok(())
            } else {
                Err("Expected a GUID (xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx)")
            }
        })
        .interact_text()
        .map(|s| s.trim().to_string())
        .map_err(|e| anyhow::anyhow!("Failed to get {}: {}", label, e))
}

/// Prompt for the profile name, defaulting to the last segment of the site path
fn prompt_profile_name(config: &ConfigFile, site_path: &str) -> Result<String> {
    let suggested = site_path
        .rsplit('/')
        .find(|s| !s.is_empty())
        .unwrap_or("default")
        .to_lowercase();
    let suggested = if !config.sites.contains_key(&suggested) {
        suggested
    } else {
        format!("{}-{}", suggested, config.sites.len() + 1)
    };

    Input::with_theme(&ColorfulTheme::default())
        .with_prompt("Profile name")
        .default(suggested)
        .validate_with(|input: &String| -> Result<(), &str> {
            if input.is_empty() {
                Err("Profile name cannot be empty")
            } else if !input
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            {
                Err("Profile name can only contain letters, digits, hyphens and underscores")
            } else {
                Ok(())
            }
        })
        .interact_text()
        .map_err(|e| anyhow::anyhow!("Failed to get profile name: {}", e))
}
