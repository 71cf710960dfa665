//! Cache command - inspect or reset the build cache

use crate::cache::{format_bytes, CacheEntry, CacheStore};
use crate::cli::args::{CacheAction, CacheArgs, OutputFormat};
use crate::config::Config;
use crate::error::Outcome;
use crate::ui::{self, UiContext};
use console::style;

/// Execute the cache command
pub async fn execute(args: CacheArgs, config: &Config) -> Outcome<()> {
    let store = CacheStore::open(&config.cache.dir).await?;

    match args.action {
        CacheAction::List { format } => list_entries(&store, format).await,
        CacheAction::Clear { yes } => clear_store(&store, yes).await,
    }
}

async fn list_entries(store: &CacheStore, format: OutputFormat) -> Outcome<()> {
    let entries = store.entries().await?;

    if entries.is_empty() && format != OutputFormat::Json {
        println!("No cache entries in {}", store.root().display());
        return Ok(());
    }

    match format {
        OutputFormat::Table => print_entry_table(&entries, store.total_size().await?),
        OutputFormat::Json => print_entry_json(&entries)?,
        OutputFormat::Plain => {
            for entry in &entries {
                println!("{}", entry.key);
            }
        }
    }

    Ok(())
}

fn print_entry_table(entries: &[CacheEntry], total_bytes: u64) {
    println!(
        "{:<44} {:<8} {:<10} {:<18}",
        "KEY", "BLOBS", "SIZE", "UPDATED"
    );
    println!("{}", "-".repeat(82));

    for entry in entries {
        let blobs = if entry.missing > 0 {
            style(format!("{} ({} missing)", entry.blobs, entry.missing))
                .yellow()
                .to_string()
        } else {
            entry.blobs.to_string()
        };

        println!(
            "{:<44} {:<8} {:<10} {:<18}",
            entry.key.to_string(),
            blobs,
            format_bytes(entry.size_bytes),
            entry.updated_at.format("%Y-%m-%d %H:%M")
        );
    }

    println!();
    println!(
        "Total: {} index(es), {} on disk",
        entries.len(),
        format_bytes(total_bytes)
    );
}

fn print_entry_json(entries: &[CacheEntry]) -> Outcome<()> {
    #[derive(serde::Serialize)]
    struct EntryJson {
        key: String,
        platform: String,
        blobs: usize,
        missing: usize,
        size_bytes: u64,
        updated_at: String,
    }

    let json: Vec<EntryJson> = entries
        .iter()
        .map(|e| EntryJson {
            key: e.key.to_string(),
            platform: e.key.platform().to_string(),
            blobs: e.blobs,
            missing: e.missing,
            size_bytes: e.size_bytes,
            updated_at: e.updated_at.to_rfc3339(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

async fn clear_store(store: &CacheStore, yes: bool) -> Outcome<()> {
    let ctx = UiContext::detect().with_auto_yes(yes);
    let size = store.total_size().await?;

    let confirmed = ui::confirm(
        &ctx,
        &format!(
            "Remove {} of cached layers from {}?",
            format_bytes(size),
            store.root().display()
        ),
        false,
    )
    .await?;

    if !confirmed {
        ui::step_warn_hint(&ctx, "Cache left as is", "Pass --yes to clear without asking");
        return Ok(());
    }

    store.clear().await?;
    ui::step_ok_detail(&ctx, "Cache cleared", &format_bytes(size));
    Ok(())
}
