//! Wiring & DI. Entry point: bootstrap adapters, inject into the service, run requests.
//! No business logic here.
//!
//! Usage: `course-automator <request.json | ->`. The file holds one request
//! object or an array of them; responses are printed to stdout as JSON.

use course_automator::adapters::persistence::JsonReviewJournal;
use course_automator::adapters::platform::{FakePlatform, HttpPlatform};
use course_automator::domain::{Response, Status};
use course_automator::ports::{AutomationPort, ReviewJournalPort, TargetSystem};
use course_automator::shared::cancel::CancellationToken;
use course_automator::shared::config::AppConfig;
use course_automator::usecases::{AutomationService, SessionPool};
use dotenv::dotenv;
use serde_json::Value;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
    let env_loaded = dotenv();
    // stdout carries the responses; logs go to stderr.
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match &env_loaded {
        Ok(path) => info!(path = %path.display(), "loaded .env"),
        Err(_) => info!(cwd = %cwd.display(), "no .env found (check CWD)"),
    }

    let cfg = AppConfig::load().map_err(|e| anyhow::anyhow!("configuration: {}", e))?;
    let settings = cfg.engine_settings();

    let source = std::env::args().nth(1).unwrap_or_else(|| "-".to_string());
    let requests = read_requests(&source).await?;
    info!(source = %source, requests = requests.len(), "requests loaded");

    // --- Target system: sandbox fake or platform REST API ---
    let (target, credentials): (Arc<dyn TargetSystem>, _) = if cfg.sandbox_or_default() {
        warn!("sandbox mode: requests run against the in-memory platform");
        let fake: Arc<dyn TargetSystem> = Arc::new(FakePlatform::new());
        (fake, FakePlatform::credentials())
    } else {
        let credentials = cfg.credentials().map_err(|e| anyhow::anyhow!("{}", e))?;
        info!(url = %credentials.url, "using platform API");
        let http = HttpPlatform::new(&credentials.url, settings.step_timeout)
            .map_err(|e| anyhow::anyhow!("{}", e))?;
        let http: Arc<dyn TargetSystem> = Arc::new(http);
        (http, credentials)
    };

    let pool = SessionPool::connect(target.as_ref(), &credentials, settings.pool_size)
        .await
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    // --- Review journal (optional) ---
    let journal: Option<Arc<dyn ReviewJournalPort>> = match cfg.review_journal.as_deref() {
        Some(path) if !path.trim().is_empty() => {
            let journal = JsonReviewJournal::new(path);
            journal.load().await.map_err(|e| anyhow::anyhow!("{}", e))?;
            info!(path, "review journal enabled");
            let journal: Arc<dyn ReviewJournalPort> = Arc::new(journal);
            Some(journal)
        }
        _ => None,
    };

    let service: Arc<dyn AutomationPort> =
        Arc::new(AutomationService::new(target, pool, &settings, journal));

    // --- Ctrl-C: stop between steps, roll back what was applied ---
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling after the current step");
                cancel.cancel();
            }
        });
    }

    let mut responses = Vec::with_capacity(requests.len());
    for request in requests {
        let kind = request
            .get("kind")
            .and_then(Value::as_str)
            .unwrap_or("-")
            .to_string();
        let response = service.submit_json(request, cancel.clone()).await;
        info!(kind = %kind, status = ?response.status(), "request finished");
        responses.push(response);
    }

    let out = if responses.len() == 1 {
        serde_json::to_string_pretty(&responses[0])?
    } else {
        serde_json::to_string_pretty(&responses)?
    };
    println!("{}", out);

    if !responses.iter().all(|r: &Response| r.status() == Status::Success) {
        std::process::exit(1);
    }
    Ok(())
}

/// One request object or an array of them, from a file or stdin (`-`).
/// Elements are parsed one by one when submitted.
async fn read_requests(source: &str) -> anyhow::Result<Vec<Value>> {
    let text = if source == "-" {
        let mut buf = String::new();
        tokio::io::stdin().read_to_string(&mut buf).await?;
        buf
    } else {
        tokio::fs::read_to_string(source)
            .await
            .map_err(|e| anyhow::anyhow!("read {}: {}", source, e))?
    };
    let value: Value = serde_json::from_str(&text)?;
    let requests = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    Ok(requests)
}
