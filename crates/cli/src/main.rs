//! restyler command line entry point.
//!
//! The control surface over the pipeline: enable/disable the per-profile
//! flag, force a refresh, dump diagnostics, and (with the `browser`
//! feature) apply or continuously supervise a live page. All pipeline
//! logic lives in the library crates; this binary only wires them up.
//! Logging goes to stderr so stdout stays scriptable.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use restyler_client::{StyleFetcher, TransportSet};
use restyler_core::{AppConfig, CacheDb, Capabilities, ProfileSet, SiteProfile};

#[cfg(feature = "browser")]
use restyler_page::{CdpPage, StylePipeline, StyleTarget, Supervisor, browser::Browser};
#[cfg(feature = "browser")]
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "restyler", version, about = "Keeps a remote stylesheet reliably applied to a live chat page")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one fetch-and-apply cycle against a live page.
    Apply {
        /// DevTools websocket of the running browser (ws://...).
        #[arg(long)]
        cdp: String,
        /// Profile name; defaults to matching the adopted page's host.
        #[arg(long)]
        profile: Option<String>,
    },
    /// Apply, then keep the stylesheet applied until interrupted.
    Watch {
        /// DevTools websocket of the running browser (ws://...).
        #[arg(long)]
        cdp: String,
        /// Profile name; defaults to matching the adopted page's host.
        #[arg(long)]
        profile: Option<String>,
    },
    /// Enable styling for a profile.
    Enable { profile: String },
    /// Disable styling for a profile.
    Disable { profile: String },
    /// Clear the profile's cache and fetch a fresh copy.
    Refresh { profile: String },
    /// Show profiles, cache state, and recent failures.
    Status {
        profile: Option<String>,
        /// Emit machine-readable JSON instead of text.
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .json()
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load()?;
    let cache = CacheDb::open(&config.db_path).await?;
    let profiles = ProfileSet::new(config.profiles.clone());

    match cli.command {
        Command::Enable { profile } => {
            let profile = resolve(&profiles, &profile)?;
            cache.set_enabled(&profile.name, true).await?;
            println!("styling enabled for '{}'", profile.name);
        }
        Command::Disable { profile } => {
            let profile = resolve(&profiles, &profile)?;
            cache.set_enabled(&profile.name, false).await?;
            println!("styling disabled for '{}'", profile.name);
        }
        Command::Refresh { profile } => {
            let profile = resolve(&profiles, &profile)?.clone();
            refresh(&config, &cache, &profile).await?;
        }
        Command::Status { profile, json } => {
            status(&config, &cache, &profiles, profile.as_deref(), json).await?;
        }
        #[cfg(feature = "browser")]
        Command::Apply { cdp, profile } => {
            let (browser, pipeline) = attach(&config, &cache, &profiles, &cdp, profile.as_deref()).await?;
            let applied = pipeline.run_once().await;
            drop(browser);
            if !applied {
                bail!("styles were not applied; see log and `restyler status`");
            }
            println!("styles applied for '{}'", pipeline.profile().name);
        }
        #[cfg(feature = "browser")]
        Command::Watch { cdp, profile } => {
            let (browser, pipeline) = attach(&config, &cache, &profiles, &cdp, profile.as_deref()).await?;
            if !pipeline.run_once().await {
                tracing::warn!("initial application failed; supervision will keep retrying");
            }

            let mut supervisor = Supervisor::new(Arc::clone(&pipeline), &config);
            supervisor.start().await;
            println!("watching '{}'; press Ctrl-C to stop", pipeline.profile().name);

            tokio::signal::ctrl_c().await.context("waiting for Ctrl-C")?;
            supervisor.stop().await;
            drop(browser);
            println!("stopped");
        }
        #[cfg(not(feature = "browser"))]
        Command::Apply { .. } | Command::Watch { .. } => {
            bail!("this build has no live-page support; rebuild with the `browser` feature");
        }
    }

    Ok(())
}

fn resolve<'a>(profiles: &'a ProfileSet, name: &str) -> Result<&'a SiteProfile> {
    profiles
        .by_name(name)
        .with_context(|| format!("unknown profile '{name}'; see `restyler status`"))
}

fn capabilities(config: &AppConfig) -> Capabilities {
    Capabilities { privileged_transport: config.privileged_transport, local_urls: true }
}

/// Clear the cache and force a fresh fetch cycle, reporting every attempt.
async fn refresh(config: &AppConfig, cache: &CacheDb, profile: &SiteProfile) -> Result<()> {
    let removed = cache.clear_styles(Some(&profile.name)).await?;
    tracing::info!(profile = %profile.name, removed, "cache cleared for refresh");

    let transports = TransportSet::assemble(capabilities(config), config, None)?;
    let fetcher = StyleFetcher::new(profile.clone(), cache.clone(), transports, config);

    let outcome = fetcher.fetch_css().await;
    for attempt in fetcher.last_attempts().await {
        let status = match &attempt.error {
            None => "ok".to_string(),
            Some(e) => e.clone(),
        };
        println!("  {} via {}: {} ({}ms)", attempt.source, attempt.transport, status, attempt.duration_ms);
    }

    match outcome {
        Ok(css) => println!("fetched {} bytes for '{}'", css.len(), profile.name),
        Err(e) => bail!("refresh failed: {e}"),
    }
    Ok(())
}

/// Read-only diagnostics dump.
async fn status(
    config: &AppConfig,
    cache: &CacheDb,
    profiles: &ProfileSet,
    only: Option<&str>,
    json: bool,
) -> Result<()> {
    let mut report = Vec::new();

    for profile in profiles.iter() {
        if let Some(name) = only
            && profile.name != name
        {
            continue;
        }

        let enabled = cache.is_enabled(&profile.name).await;
        let cached = cache.get_style(profile, config.cache_ttl()).await;

        report.push(serde_json::json!({
            "profile": profile.name,
            "hosts": profile.hosts,
            "sources": profile.sources,
            "artifact_id": profile.artifact_id,
            "enabled": enabled,
            "cache": cached.as_ref().map(|c| serde_json::json!({
                "source_url": c.source_url,
                "stored_at": c.stored_at.to_rfc3339(),
                "age_minutes": (chrono::Utc::now() - c.stored_at).num_minutes(),
                "bytes": c.css.len(),
            })),
        }));
    }

    if report.is_empty() {
        bail!("no matching profile; configured: {}", profiles.iter().map(|p| p.name.as_str()).collect::<Vec<_>>().join(", "));
    }

    let errors = cache.recent_errors(10).await;

    if json {
        let doc = serde_json::json!({
            "profiles": report,
            "recent_errors": errors
                .iter()
                .map(|e| serde_json::json!({
                    "occurred_at": e.occurred_at,
                    "profile": e.profile,
                    "message": e.message,
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&doc)?);
        return Ok(());
    }

    for entry in &report {
        println!("profile {}", entry["profile"].as_str().unwrap_or("?"));
        println!("  enabled: {}", entry["enabled"]);
        match &entry["cache"] {
            serde_json::Value::Null => println!("  cache: absent"),
            cached => println!(
                "  cache: {} bytes from {} ({} min old)",
                cached["bytes"], cached["source_url"], cached["age_minutes"]
            ),
        }
    }

    if !errors.is_empty() {
        println!("recent failures:");
        for e in errors {
            println!("  {} [{}] {}", e.occurred_at, e.profile, e.message);
        }
    }

    Ok(())
}

/// Adopt a page over CDP and build the per-profile pipeline for it.
#[cfg(feature = "browser")]
async fn attach(
    config: &AppConfig,
    cache: &CacheDb,
    profiles: &ProfileSet,
    cdp: &str,
    profile_name: Option<&str>,
) -> Result<(Browser, Arc<StylePipeline<CdpPage>>)> {
    let wanted = profile_name
        .map(|name| resolve(profiles, name).map(|p| p.hosts.clone()))
        .transpose()?;

    let (browser, page) = CdpPage::attach(cdp, wanted.as_deref()).await?;

    let profile = match profile_name {
        Some(name) => resolve(profiles, name)?.clone(),
        None => {
            let url = page.current_url().await.unwrap_or_default();
            let host = url::Url::parse(&url)
                .ok()
                .and_then(|u| u.host_str().map(|h| h.to_string()))
                .with_context(|| format!("adopted page has no usable host: {url}"))?;
            profiles
                .for_host(&host)
                .with_context(|| format!("no profile matches host '{host}'"))?
                .clone()
        }
    };

    let caps = capabilities(config);
    let in_page = page.in_page_transport(config.fetch_timeout());
    let transports = TransportSet::assemble(caps, config, Some(Box::new(in_page)))?;
    let fetcher = StyleFetcher::new(profile.clone(), cache.clone(), transports, config);

    let target = Arc::new(page);
    let pipeline = Arc::new(StylePipeline::new(profile, cache.clone(), target, fetcher, caps, config));
    Ok((browser, pipeline))
}
