use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use colored::Colorize;
use plan_fabric::{DeadLetterLog, DeadLetterRecord};
use plan_index::{IndexNode, PlanQuery};
use plan_records::{DeleteOutcome, ReadOutcome};
use plan_schema::{PlanSchemaValidator, Validator};
use plan_sdk::{PlanConfig, PlanService};
use plan_types::{Fingerprint, PlanRecord};
use serde_json::{json, Value};

use crate::cli::*;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = resolve_config(cli.config.as_deref(), cli.data_dir.clone())?;
    let format = cli.format;
    match cli.command {
        Command::Fingerprint(args) => cmd_fingerprint(args, format),
        Command::Merge(args) => cmd_merge(args),
        Command::Validate(args) => cmd_validate(args, format),
        Command::Create(args) => cmd_create(config, args, format).await,
        Command::Get(args) => cmd_get(config, args, format).await,
        Command::Replace(args) => cmd_replace(config, args, format).await,
        Command::Patch(args) => cmd_patch(config, args, format).await,
        Command::Delete(args) => cmd_delete(config, args, format).await,
        Command::Search(args) => cmd_search(config, args, format).await,
        Command::DeadLetters(args) => cmd_dead_letters(&config, args, format),
    }
}

fn resolve_config(path: Option<&Path>, data_dir: Option<PathBuf>) -> anyhow::Result<PlanConfig> {
    let mut config = match path {
        Some(path) => PlanConfig::from_file(path)?,
        None => PlanConfig::default(),
    };
    if data_dir.is_some() {
        config.store.data_dir = data_dir;
    }
    Ok(config)
}

async fn open_service(config: PlanConfig) -> anyhow::Result<PlanService> {
    if config.store.data_dir.is_none() {
        bail!("no record directory: pass --data-dir or set [store] data_dir");
    }
    Ok(PlanService::open(config).await?)
}

fn read_document(path: &Path) -> anyhow::Result<Value> {
    let bytes = if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::stdin().read_to_end(&mut buf)?;
        buf
    } else {
        std::fs::read(path).with_context(|| format!("reading {}", path.display()))?
    };
    serde_json::from_slice(&bytes).with_context(|| format!("parsing {}", path.display()))
}

fn parse_fingerprint(hex: Option<&str>) -> anyhow::Result<Option<Fingerprint>> {
    hex.map(|h| Fingerprint::from_hex(h).with_context(|| format!("bad fingerprint {h:?}")))
        .transpose()
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_record(verb: &str, record: &PlanRecord, format: OutputFormat) -> anyhow::Result<()> {
    match format {
        OutputFormat::Json => print_json(record),
        OutputFormat::Text => {
            println!("{} {} {}", "✓".green().bold(), verb, record.object_id.bold());
            println!("  Fingerprint: {}", record.fingerprint.to_hex().yellow());
            println!(
                "  Updated: {} by {}",
                record.metadata.updated_at.to_rfc3339(),
                record
                    .metadata
                    .updated_by
                    .as_deref()
                    .unwrap_or(&record.metadata.created_by)
                    .cyan()
            );
            Ok(())
        }
    }
}

// ---- Stateless document tools ----

fn cmd_fingerprint(args: DocumentArgs, format: OutputFormat) -> anyhow::Result<()> {
    let document = read_document(&args.path)?;
    let fingerprint = plan_crypto::fingerprint(&document);
    match format {
        OutputFormat::Json => print_json(&json!({ "fingerprint": fingerprint })),
        OutputFormat::Text => {
            println!("{}", fingerprint.to_hex());
            Ok(())
        }
    }
}

fn cmd_merge(args: MergeArgs) -> anyhow::Result<()> {
    let base = read_document(&args.base)?;
    let patch = read_document(&args.patch)?;
    print_json(&plan_merge::merge(&base, &patch))
}

fn cmd_validate(args: DocumentArgs, format: OutputFormat) -> anyhow::Result<()> {
    let document = read_document(&args.path)?;
    let violations = PlanSchemaValidator.validate(&document).err().unwrap_or_default();
    match format {
        OutputFormat::Json => print_json(&json!({
            "valid": violations.is_empty(),
            "violations": violations,
        }))?,
        OutputFormat::Text if violations.is_empty() => {
            println!("{} {} is a valid plan", "✓".green().bold(), args.path.display());
        }
        OutputFormat::Text => {
            for violation in &violations {
                println!("  {} {}", "✗".red(), violation);
            }
        }
    }
    if !violations.is_empty() {
        bail!("{} violation(s)", violations.len());
    }
    Ok(())
}

// ---- Record operations ----

async fn cmd_create(config: PlanConfig, args: CreateArgs, format: OutputFormat) -> anyhow::Result<()> {
    let document = read_document(&args.path)?;
    let service = open_service(config).await?;
    let record = service.create(document, &args.actor).await;
    service.shutdown().await?;
    print_record("Created", &record?, format)
}

async fn cmd_get(config: PlanConfig, args: GetArgs, format: OutputFormat) -> anyhow::Result<()> {
    let known = parse_fingerprint(args.if_none_match.as_deref())?;
    let service = open_service(config).await?;
    let outcome = service.read_if_changed(&args.id, known.as_ref()).await;
    service.shutdown().await?;

    match (outcome?, format) {
        (ReadOutcome::NotModified(fingerprint), OutputFormat::Json) => {
            print_json(&json!({ "objectId": args.id, "notModified": true, "fingerprint": fingerprint }))
        }
        (ReadOutcome::NotModified(_), OutputFormat::Text) => {
            println!("{} not modified", args.id.bold());
            Ok(())
        }
        (ReadOutcome::Modified(record), OutputFormat::Json) => print_json(&record),
        (ReadOutcome::Modified(record), OutputFormat::Text) => {
            println!("{} {}", record.object_id.bold(), record.fingerprint.short_hex().yellow());
            println!("{}", serde_json::to_string_pretty(&record.data)?);
            Ok(())
        }
    }
}

async fn cmd_replace(config: PlanConfig, args: WriteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let expected = parse_fingerprint(args.if_match.as_deref())?;
    let document = read_document(&args.path)?;
    let service = open_service(config).await?;
    let record = service
        .replace(&args.id, document, expected.as_ref(), &args.actor)
        .await;
    service.shutdown().await?;
    print_record("Replaced", &record?, format)
}

async fn cmd_patch(config: PlanConfig, args: WriteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let expected = parse_fingerprint(args.if_match.as_deref())?;
    let partial = read_document(&args.path)?;
    let service = open_service(config).await?;
    let record = service
        .patch(&args.id, partial, expected.as_ref(), &args.actor)
        .await;
    service.shutdown().await?;
    print_record("Patched", &record?, format)
}

async fn cmd_delete(config: PlanConfig, args: DeleteArgs, format: OutputFormat) -> anyhow::Result<()> {
    let service = open_service(config).await?;
    let outcome = service.delete(&args.id, &args.actor).await;
    service.shutdown().await?;

    match outcome? {
        DeleteOutcome::Record { object_id } => match format {
            OutputFormat::Json => print_json(&json!({ "deleted": object_id })),
            OutputFormat::Text => {
                println!("{} Deleted plan {}", "✓".green().bold(), object_id.bold());
                Ok(())
            }
        },
        DeleteOutcome::Nested { child_id, position, owner } => match format {
            OutputFormat::Json => print_json(&json!({
                "deleted": child_id,
                "position": position.to_string(),
                "owner": owner,
            })),
            OutputFormat::Text => {
                println!(
                    "{} Removed {} ({}) from plan {}",
                    "✓".green().bold(),
                    child_id.bold(),
                    position,
                    owner.object_id.bold()
                );
                println!("  Fingerprint: {}", owner.fingerprint.to_hex().yellow());
                Ok(())
            }
        },
    }
}

// ---- Search and dead letters ----

pub(crate) fn query_of(query: SearchQuery) -> PlanQuery {
    match query {
        SearchQuery::Org { org } => PlanQuery::ByOrg { org },
        SearchQuery::PlanType { plan_type } => PlanQuery::ByPlanType { plan_type },
        SearchQuery::Service { service_id } => PlanQuery::ByServiceId { service_id },
        SearchQuery::Copay { min } => PlanQuery::CopayAtLeast { min },
        SearchQuery::Children { plan_id, relation: None } => PlanQuery::Children { plan_id },
        SearchQuery::Children { plan_id, relation: Some(relation) } => {
            PlanQuery::ChildrenByRelation { plan_id, relation }
        }
    }
}

async fn cmd_search(config: PlanConfig, args: SearchArgs, format: OutputFormat) -> anyhow::Result<()> {
    let query = query_of(args.query);
    let service = open_service(config).await?;
    let hits = async {
        service.reindex().await?;
        service.settle().await?;
        service.search(&query).await
    }
    .await;
    service.shutdown().await?;

    let hits = hits?;
    match format {
        OutputFormat::Json => print_json(&hits),
        OutputFormat::Text => {
            if hits.is_empty() {
                println!("No matches.");
            }
            for node in &hits {
                println!("{}", describe_node(node));
            }
            Ok(())
        }
    }
}

fn describe_node(node: &IndexNode) -> String {
    let mut line = format!("{} {}", node.object_id.bold(), node.relation.to_string().cyan());
    if let Some(parent) = &node.parent_id {
        line.push_str(&format!(" (parent {parent})"));
    }
    if let Some(plan_type) = &node.plan_type {
        line.push_str(&format!(" planType={plan_type}"));
    }
    if let Some(name) = &node.name {
        line.push_str(&format!(" name={name:?}"));
    }
    if let (Some(deductible), Some(copay)) = (node.deductible, node.copay) {
        line.push_str(&format!(" deductible={deductible} copay={copay}"));
    }
    line
}

fn cmd_dead_letters(config: &PlanConfig, args: DeadLettersArgs, format: OutputFormat) -> anyhow::Result<()> {
    let Some(path) = args.path.or_else(|| config.dead_letter.path.clone()) else {
        bail!("no dead-letter log: pass a path or set [dead_letter] path");
    };
    if !path.exists() {
        bail!("dead-letter log {} does not exist", path.display());
    }
    let records = DeadLetterLog::open(&path)?.recover()?;
    match format {
        OutputFormat::Json => {
            let letters = records
                .iter()
                .map(letter_json)
                .collect::<anyhow::Result<Vec<_>>>()?;
            print_json(&letters)
        }
        OutputFormat::Text => {
            if records.is_empty() {
                println!("No dead letters.");
            }
            for record in &records {
                println!(
                    "{} {} {} after {} attempt(s)",
                    record.event_id.to_string().yellow(),
                    record.operation,
                    record.object_id.bold(),
                    record.attempts
                );
                println!("  Reason: {}", record.reason.red());
                println!("  At: {}", record.dead_lettered_at.to_rfc3339());
            }
            Ok(())
        }
    }
}

fn letter_json(record: &DeadLetterRecord) -> anyhow::Result<Value> {
    Ok(json!({
        "eventId": record.event_id.to_string(),
        "objectId": record.object_id,
        "operation": record.operation,
        "reason": record.reason,
        "attempts": record.attempts,
        "publishedAt": record.published_at,
        "deadLetteredAt": record.dead_lettered_at,
        "event": record.event()?,
    }))
}
