//! CLI command handlers

use anyhow::Result;
use std::sync::Arc;

use crate::auth::browser::NoBrowser;
use crate::auth::extract::{best_access_token, refresh_token_record, skype_token_from};
use crate::auth::{
    BearerToken, BrowserSession, CommandBrowser, Orchestrator, Resource, TokenExtractor,
};
use crate::config::Settings;
use crate::error::{AuthError, ErrorKind};
use crate::http::ReqwestTransport;
use crate::storage::SecureStore;

/// Everything a command needs, wired from `config.toml`.
pub struct Context {
    pub settings: Settings,
    pub orchestrator: Orchestrator,
}

impl Context {
    pub fn open() -> Result<Self> {
        let store = Arc::new(SecureStore::open_default()?);
        let settings = Settings::load(store.dir())?;
        tracing::debug!("Using config directory {}", store.dir().display());

        let transport = Arc::new(ReqwestTransport::new(
            settings.http_timeout(),
            settings.http_max_retries,
        )?);
        let browser: Arc<dyn BrowserSession> = match &settings.browser_command {
            Some(command) => Arc::new(CommandBrowser::new(
                command.clone(),
                store.dir().to_path_buf(),
                settings.browser_timeout(),
            )),
            None => Arc::new(NoBrowser),
        };

        let extractor = Arc::new(TokenExtractor::new(store));
        let orchestrator = Orchestrator::new(extractor, transport, browser, &settings);
        Ok(Self {
            settings,
            orchestrator,
        })
    }

    fn extractor(&self) -> &TokenExtractor {
        self.orchestrator.extractor()
    }
}

pub async fn login(ctx: &Context) -> Result<(), AuthError> {
    ctx.orchestrator.login().await?;
    println!("Logged in. Session saved to {}", ctx.extractor().store().dir().display());
    Ok(())
}

pub fn logout(ctx: &Context) {
    ctx.orchestrator.logout();
    println!("Logged out.");
}

pub fn status(ctx: &Context) -> Result<(), AuthError> {
    let store = ctx.extractor().store();
    let doc = match store.read_session() {
        Some(doc) => doc,
        None => {
            println!("Session:     none");
            return Ok(());
        }
    };

    match store.session_age() {
        Some(age) => {
            let stale = store.is_session_likely_expired(ctx.settings.session_max_age_hours);
            println!(
                "Session:     {}h{:02}m old{}",
                age.as_secs() / 3600,
                age.as_secs() % 3600 / 60,
                if stale { " (likely expired)" } else { "" }
            );
        }
        None => println!("Session:     present"),
    }

    match refresh_token_record(&doc) {
        Some(_) => println!("Refresh tok: present"),
        None => println!("Refresh tok: none"),
    }

    for resource in Resource::TRACKED {
        let label = format!("{}:", resource);
        match best_access_token(&doc, resource) {
            Some((_, at)) => {
                let token = BearerToken::new(at.secret, Some(at.expires_on));
                print_token(&label, &token);
            }
            None => println!("{:<12} none", label),
        }
    }
    match skype_token_from(&doc) {
        Some(token) => print_token("skype:", &token),
        None => println!("{:<12} none", "skype:"),
    }
    match ctx.extractor().auth_token() {
        Some(token) => print_token("auth:", &token),
        None => println!("{:<12} none or expired", "auth:"),
    }

    if let Ok(id) = ctx.extractor().identity() {
        println!(
            "User:        {}",
            id.display_name.as_deref().unwrap_or(&id.object_id)
        );
    }
    if let Ok(region) = ctx.extractor().region() {
        println!("Region:      {}", region.region);
    }
    Ok(())
}

fn print_token(label: &str, token: &BearerToken) {
    if token.is_expired() {
        println!("{:<12} expired", label);
        return;
    }
    match (token.minutes_remaining(), token.expiry()) {
        (Some(minutes), Some(at)) => {
            println!("{:<12} valid ({} min left, expires {})", label, minutes, at)
        }
        _ => println!("{:<12} valid", label),
    }
}

pub async fn refresh(ctx: &Context, force: bool) -> Result<(), AuthError> {
    let outcome = ctx.orchestrator.refresh(force).await?;
    let Some(method) = outcome.method else {
        println!(
            "Tokens still valid for {} min; nothing to do (use --force to refresh anyway).",
            (outcome.new_expiry - chrono::Utc::now().timestamp()).max(0) / 60
        );
        return Ok(());
    };

    println!("Refreshed via {} (+{} min)", method, outcome.minutes_gained);
    let expiry = |at: i64| {
        chrono::DateTime::from_timestamp(at, 0).map_or_else(|| at.to_string(), |t| t.to_string())
    };
    match outcome.previous_expiry {
        Some(prev) => println!(
            "  expiry:      {} -> {}{}",
            expiry(prev),
            expiry(outcome.new_expiry),
            if outcome.refresh_needed { "" } else { " (forced)" }
        ),
        None => println!("  expiry:      {}", expiry(outcome.new_expiry)),
    }

    let report = &outcome.report;
    if report.tokens_attempted > 0 {
        println!(
            "  scopes:      {}/{} refreshed",
            report.tokens_refreshed, report.tokens_attempted
        );
        for (resource, kind) in &report.failures {
            println!("  failed:      {} ({})", resource, kind);
        }
        println!(
            "  refresh tok: {}",
            if report.refresh_token_rotated { "rotated" } else { "unchanged" }
        );
        println!(
            "  skype token: {}",
            if report.skype_token_refreshed { "refreshed" } else { "unchanged" }
        );
    }

    let rejected = report.rejected_scopes();
    if !rejected.is_empty() {
        let names: Vec<_> = rejected.iter().map(|r| r.name()).collect();
        eprintln!(
            "Warning [{}]: the refresh token was rejected for {}. Run 'teams-session login' to restore them.",
            ErrorKind::AuthExpired,
            names.join(", ")
        );
    }
    Ok(())
}

pub async fn token(ctx: &Context, resource: Resource) -> Result<(), AuthError> {
    let token = ctx.orchestrator.ensure_token(resource).await?;
    println!("{}", token.token);
    Ok(())
}

pub async fn skype_token(ctx: &Context) -> Result<(), AuthError> {
    let token = ctx.orchestrator.ensure_skype_token().await?;
    println!("{}", token.token);
    Ok(())
}

pub fn whoami(ctx: &Context) -> Result<(), AuthError> {
    let id = ctx.extractor().identity()?;

    println!();
    println!(
        "Display Name: {}",
        id.display_name.as_deref().unwrap_or("(none)")
    );
    println!("Given Name:   {}", id.given_name.as_deref().unwrap_or("(none)"));
    println!("Surname:      {}", id.surname.as_deref().unwrap_or("(none)"));
    println!("Email:        {}", id.email.as_deref().unwrap_or("(none)"));
    println!("Tenant:       {}", id.tenant_id.as_deref().unwrap_or("(none)"));
    println!("ID:           {}", id.object_id);

    Ok(())
}

pub fn region(ctx: &Context) -> Result<(), AuthError> {
    let region = ctx.extractor().region()?;

    println!("Region:       {}", region.region);
    println!(
        "Partition:    {}",
        region.region_partition.as_deref().unwrap_or("(none)")
    );
    println!("Middle tier:  {}", region.teams_base_url);
    println!("Chat service: {}", region.chat_service_url());
    println!("Aggregator:   {}", region.chatsvcagg_url());

    let mut services: Vec<_> = region.gtms.iter().collect();
    services.sort();
    for (name, url) in services {
        println!("  {:<28} {}", name, url);
    }
    Ok(())
}

