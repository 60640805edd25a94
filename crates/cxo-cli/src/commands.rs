use std::ops::ControlFlow;

use anyhow::{bail, Context};
use colored::Colorize;
use serde_json::{json, Value};

use cxo_data::{Db, DbConfig, LogDb, RootRecord, Space};
use cxo_types::PubKey;

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let db = open_db(&cli)?;
    let format = cli.format;
    match cli.command {
        Command::Stat => cmd_stat(&db, format)?,
        Command::Feeds => cmd_feeds(&db, format)?,
        Command::Roots(args) => cmd_roots(&db, format, args)?,
        Command::Last(args) => cmd_last(&db, format, args)?,
        Command::Trim(args) => cmd_trim(&db, format, args)?,
        Command::DelFeed(args) => cmd_del_feed(&db, format, args)?,
        Command::Verify(args) => cmd_verify(&db, format, args)?,
        Command::Compact => cmd_compact(&db, format)?,
    }
    db.close()?;
    Ok(())
}

fn open_db(cli: &Cli) -> anyhow::Result<LogDb> {
    let mut config = match &cli.config {
        Some(path) => DbConfig::load(path)?,
        None => DbConfig::default(),
    };
    if let Some(path) = &cli.db_path {
        config.db_path = Some(path.clone());
    }
    if config.in_memory {
        bail!("configuration selects an in-memory database; there is nothing on disk to open");
    }
    let path = config.db_path();
    if !path.exists() {
        bail!("no database at {}", path.display());
    }
    let db = LogDb::open(&path, config.sync_mode, config.chain)
        .with_context(|| format!("opening {}", path.display()))?;
    Ok(db)
}

fn parse_feed(hex: &str) -> anyhow::Result<PubKey> {
    PubKey::from_hex(hex).with_context(|| format!("invalid feed key {hex:?}"))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn root_json(root: &RootRecord) -> Value {
    json!({
        "seq": root.seq,
        "hash": root.hash.to_hex(),
        "prev": root.prev.to_hex(),
        "sig": root.sig.to_hex(),
        "payload_len": root.payload.len(),
        "space": root.space().0,
    })
}

fn print_root(root: &RootRecord) {
    let prev = if root.prev.is_zero() {
        "-".dimmed().to_string()
    } else {
        root.prev.short_hex()
    };
    println!(
        "{:>8}  {}  prev {}  {}",
        root.seq.to_string().yellow(),
        root.hash.short_hex().cyan(),
        prev,
        root.space()
    );
}

fn sorted_feeds(db: &LogDb) -> anyhow::Result<Vec<PubKey>> {
    let mut feeds = db.feeds()?;
    feeds.sort_unstable();
    Ok(feeds)
}

fn cmd_stat(db: &LogDb, format: OutputFormat) -> anyhow::Result<()> {
    let stat = db.stat()?;
    let mut feeds: Vec<_> = stat.feeds.iter().collect();
    feeds.sort_unstable_by_key(|(feed, _)| **feed);

    if format == OutputFormat::Json {
        let feeds: Vec<Value> = feeds
            .iter()
            .map(|(feed, fs)| json!({ "feed": feed.to_hex(), "roots": fs.roots, "space": fs.space.0 }))
            .collect();
        return print_json(&json!({
            "path": db.path().display().to_string(),
            "log_size": db.log_size(),
            "objects": stat.objects,
            "space": stat.space.0,
            "roots": stat.roots(),
            "total_space": stat.total_space().0,
            "feeds": feeds,
        }));
    }

    println!("Database {}", db.path().display().to_string().bold());
    println!("  Log size: {}", Space(db.log_size()));
    println!("  Objects:  {} ({})", stat.objects.to_string().bold(), stat.space);
    println!("  Feeds:    {}", stat.feeds.len().to_string().bold());
    println!("  Roots:    {}", stat.roots().to_string().bold());
    println!("  Total:    {}", stat.total_space());
    for (feed, fs) in feeds {
        println!("    {}  {} roots, {}", feed.to_hex().cyan(), fs.roots, fs.space);
    }
    Ok(())
}

fn cmd_feeds(db: &LogDb, format: OutputFormat) -> anyhow::Result<()> {
    let feeds = sorted_feeds(db)?;
    if format == OutputFormat::Json {
        let feeds: Vec<String> = feeds.iter().map(PubKey::to_hex).collect();
        return print_json(&json!(feeds));
    }
    if feeds.is_empty() {
        println!("No feeds.");
    }
    for feed in feeds {
        println!("{}", feed.to_hex().cyan());
    }
    Ok(())
}

fn cmd_roots(db: &LogDb, format: OutputFormat, args: RootsArgs) -> anyhow::Result<()> {
    let feed = parse_feed(&args.feed)?;
    let limit = args.limit.unwrap_or(usize::MAX);

    let mut roots = Vec::new();
    let mut visit = |root: &RootRecord| {
        if roots.len() >= limit {
            return ControlFlow::Break(());
        }
        roots.push(root.clone());
        ControlFlow::Continue(())
    };
    if args.reverse {
        db.range_feed_reverse(&feed, &mut visit)?;
    } else {
        db.range_feed(&feed, &mut visit)?;
    }

    if format == OutputFormat::Json {
        return print_json(&Value::Array(roots.iter().map(root_json).collect()));
    }
    if roots.is_empty() {
        println!("No roots for feed {}.", feed.short_hex().cyan());
    }
    for root in &roots {
        print_root(root);
    }
    Ok(())
}

fn cmd_last(db: &LogDb, format: OutputFormat, args: FeedArgs) -> anyhow::Result<()> {
    let feed = parse_feed(&args.feed)?;
    let last = db.last_root(&feed)?;
    if format == OutputFormat::Json {
        return print_json(&last.as_ref().map(root_json).unwrap_or(Value::Null));
    }
    match last {
        Some(root) => print_root(&root),
        None => println!("No roots for feed {}.", feed.short_hex().cyan()),
    }
    Ok(())
}

fn cmd_trim(db: &LogDb, format: OutputFormat, args: TrimArgs) -> anyhow::Result<()> {
    let feed = parse_feed(&args.feed)?;
    let removed = db.delete_roots_before(&feed, args.seq)?;
    if format == OutputFormat::Json {
        return print_json(&json!({ "feed": feed.to_hex(), "before": args.seq, "removed": removed }));
    }
    println!(
        "{} Removed {} roots below seq {} from feed {}",
        "✓".green(),
        removed.to_string().bold(),
        args.seq,
        feed.short_hex().cyan()
    );
    Ok(())
}

fn cmd_del_feed(db: &LogDb, format: OutputFormat, args: FeedArgs) -> anyhow::Result<()> {
    let feed = parse_feed(&args.feed)?;
    let existed = db.has_feed(&feed)?;
    db.del_feed(&feed)?;
    if format == OutputFormat::Json {
        return print_json(&json!({ "feed": feed.to_hex(), "deleted": existed }));
    }
    if existed {
        println!("{} Deleted feed {}", "✓".green(), feed.short_hex().cyan());
    } else {
        println!("Feed {} not found.", feed.short_hex().cyan());
    }
    Ok(())
}

fn cmd_verify(db: &LogDb, format: OutputFormat, args: FeedArgs) -> anyhow::Result<()> {
    let feed = parse_feed(&args.feed)?;
    let roots = db.roots(&feed)?.len();
    let result = db.verify_feed(&feed);
    if format == OutputFormat::Json {
        print_json(&json!({
            "feed": feed.to_hex(),
            "roots": roots,
            "valid": result.is_ok(),
            "error": result.as_ref().err().map(|e| e.to_string()),
        }))?;
    } else if result.is_ok() {
        println!(
            "{} Feed {} chain verified ({} roots)",
            "✓".green().bold(),
            feed.short_hex().cyan(),
            roots
        );
    }
    result.with_context(|| format!("feed {} failed verification", feed.short_hex()))
}

fn cmd_compact(db: &LogDb, format: OutputFormat) -> anyhow::Result<()> {
    let before = db.log_size();
    db.compact()?;
    let after = db.log_size();
    if format == OutputFormat::Json {
        return print_json(&json!({ "before": before, "after": after }));
    }
    println!("{} Compacted log: {} -> {}", "✓".green(), Space(before), Space(after));
    Ok(())
}
