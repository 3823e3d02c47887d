//! Command handlers. Each boots an in-process vault from config, runs one
//! operation, and prints for humans by default or JSON with `--json`.

use anyhow::{bail, Context};
use memvault_kernel::{default_config_path, load_config, MemoryDraft, Vault};
use memvault_types::config::VaultConfig;
use memvault_types::{MemoryId, MemoryStatus};
use std::path::Path;

async fn open_vault(config_path: Option<&Path>) -> anyhow::Result<Vault> {
    let config = load_config(config_path).context("loading configuration")?;
    Vault::open(config).await.context("opening vault stores")
}

fn parse_id(raw: &str) -> anyhow::Result<MemoryId> {
    MemoryId::parse(raw).with_context(|| format!("'{raw}' is not a valid memory id"))
}

pub fn cmd_init(force: bool) -> anyhow::Result<()> {
    let path = default_config_path();
    if path.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            path.display()
        );
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let rendered =
        toml::to_string_pretty(&VaultConfig::default()).context("rendering default config")?;
    std::fs::write(&path, rendered)?;
    println!("Wrote {}", path.display());
    Ok(())
}

pub async fn cmd_add(
    config: Option<&Path>,
    user: &str,
    text: &str,
    relates_to: &[String],
    supersedes: Option<&str>,
) -> anyhow::Result<()> {
    let mut draft = MemoryDraft::new(user, text);
    for raw in relates_to {
        draft = draft.relates_to(parse_id(raw)?);
    }
    if let Some(raw) = supersedes {
        draft = draft.supersedes(parse_id(raw)?);
    }

    let vault = open_vault(config).await?;
    let receipt = vault.coordinator().remember(draft).await?;
    if receipt.fully_indexed() {
        println!("{}", receipt.memory_id);
    } else {
        println!(
            "{} (accepted; indexing pending, run `memvault reconcile` to catch up)",
            receipt.memory_id
        );
    }
    Ok(())
}

pub async fn cmd_get(config: Option<&Path>, memory_id: &str, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let record = vault.coordinator().fetch(parse_id(memory_id)?).await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&record)?);
    } else {
        println!("id:      {}", record.memory_id);
        println!("user:    {}", record.user_id);
        println!("status:  {}", record.status);
        println!("version: {}", record.version);
        println!("created: {}", record.created_at.to_rfc3339());
        println!("updated: {}", record.updated_at.to_rfc3339());
        println!("text:    {}", record.text);
    }
    Ok(())
}

pub async fn cmd_edit(config: Option<&Path>, memory_id: &str, text: &str) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let receipt = vault
        .coordinator()
        .amend(parse_id(memory_id)?, text)
        .await?;
    println!("{} now at version {}", receipt.memory_id, receipt.version);
    Ok(())
}

pub async fn cmd_search(
    config: Option<&Path>,
    user: &str,
    query: &str,
    limit: usize,
    json: bool,
) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let hits = vault.coordinator().recall(user, query, limit).await?;
    if json {
        let rows: Vec<serde_json::Value> = hits
            .iter()
            .map(|hit| {
                serde_json::json!({
                    "memory_id": hit.record.memory_id,
                    "score": hit.score,
                    "text": hit.record.text,
                    "status": hit.record.status,
                    "related": hit.related,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }
    if hits.is_empty() {
        println!("No matches.");
        return Ok(());
    }
    for hit in hits {
        println!(
            "{:.3}  {}  {}",
            hit.score, hit.record.memory_id, hit.record.text
        );
        if !hit.related.is_empty() {
            let ids: Vec<String> = hit.related.iter().map(|id| id.to_string()).collect();
            println!("       related: {}", ids.join(", "));
        }
    }
    Ok(())
}

pub async fn cmd_forget(config: Option<&Path>, memory_id: &str) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    vault.coordinator().forget(parse_id(memory_id)?).await?;
    println!("Forgotten.");
    Ok(())
}

pub async fn cmd_reconcile(config: Option<&Path>) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let report = vault.reconcile_now().await;
    println!("repaired:          {}", report.repaired);
    println!("deletes completed: {}", report.deletes_completed);
    println!("retry exhausted:   {}", report.exhausted);
    println!("orphans removed:   {}", report.orphans_removed);
    println!("orphans deferred:  {}", report.orphans_deferred);
    println!("demoted to degraded: {}", report.demoted);
    Ok(())
}

pub async fn cmd_watch(config: Option<&Path>) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let handle = vault.start_reconciler();
    println!(
        "Reconciler running every {}s; Ctrl+C to stop.",
        vault.config().reconciler.interval_secs
    );
    tokio::signal::ctrl_c().await?;
    vault.shutdown();
    handle.await?;
    Ok(())
}

pub async fn cmd_status(config: Option<&Path>, json: bool) -> anyhow::Result<()> {
    let vault = open_vault(config).await?;
    let metadata = vault.coordinator().metadata();

    let mut counts = Vec::new();
    for status in [
        MemoryStatus::Pending,
        MemoryStatus::Synced,
        MemoryStatus::Degraded,
        MemoryStatus::Deleted,
    ] {
        let records = metadata.list_by_status(status, 1_000_000).await?;
        counts.push((status, records.len()));
    }

    if json {
        let map: serde_json::Map<String, serde_json::Value> = counts
            .iter()
            .map(|(status, n)| (status.to_string(), serde_json::json!(n)))
            .collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        return Ok(());
    }
    for (status, n) in counts {
        println!("{:>8}: {n}", status.as_str());
    }
    Ok(())
}
