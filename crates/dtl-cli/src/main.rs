use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use dtl_core::{fingerprint, CandidateEvidence, EvidenceId, Fingerprint, Scope, Switch};
use dtl_runner::{now_unix, RunOutcome, RunRequest, StaticDraft, StaticEvidence, Workspace};
use dtl_storage::{InMemoryStorage, RunLedger, Storage};

#[derive(Parser)]
#[command(name = "dtl", version)]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Initialize in the current repo (creates .dtl/, config, switch record, db)
    Init {
        #[arg(long, default_value = "operator")]
        operator: String,
    },

    /// Evidence counts, report count, engaged switches and missing gate settings
    Status,

    #[command(subcommand)]
    Evidence(EvidenceCmd),

    /// Produce a report for a query from a prepared draft
    Run {
        #[arg(long)]
        query: String,
        /// Draft text with [EVID:<id>] citations
        #[arg(long)]
        draft: PathBuf,
        /// JSON array of {type, payload, global} collected for this run
        #[arg(long)]
        evidence: Option<PathBuf>,
        #[arg(long, default_value = "reporter")]
        actor: String,
        /// Generate fresh content after a metadata-only fallback
        #[arg(long)]
        regenerate: bool,
    },

    #[command(subcommand)]
    Ledger(LedgerCmd),

    #[command(subcommand)]
    Switches(SwitchesCmd),

    /// Write the committed report, its ledger entries and cited evidence under the data root
    Export {
        #[arg(long)]
        fingerprint: String,
    },

    /// Replay a fixture scenario against an in-memory store
    Scenario { dir: PathBuf },
}

#[derive(Subcommand)]
enum EvidenceCmd {
    /// Ingest evidence items from a JSON file
    Add {
        #[arg(long)]
        query: String,
        #[arg(long)]
        file: PathBuf,
    },
    Get {
        id: String,
    },
    List {
        /// Only items scoped to this query
        #[arg(long)]
        query: Option<String>,
    },
    Expire {
        id: String,
    },
    Revoke {
        id: String,
    },
    /// Expire every active item older than the configured TTL
    ExpireStale,
}

#[derive(Subcommand)]
enum LedgerCmd {
    Show {
        #[arg(long)]
        run: Option<String>,
    },
    /// Check sequence continuity and payload hashes
    Verify,
}

#[derive(Subcommand)]
enum SwitchesCmd {
    Show,
    Set {
        name: String,
        #[arg(long)]
        off: bool,
        #[arg(long, default_value = "operator")]
        operator: String,
    },
}

#[derive(Deserialize)]
struct EvidenceFileItem {
    #[serde(rename = "type")]
    evidence_type: String,
    payload: serde_json::Value,
    #[serde(default)]
    global: bool,
}

fn read_candidates(path: &Path, fp: &Fingerprint) -> anyhow::Result<Vec<CandidateEvidence>> {
    let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let items: Vec<EvidenceFileItem> = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
    Ok(items
        .into_iter()
        .map(|i| CandidateEvidence {
            evidence_type: i.evidence_type,
            payload: i.payload,
            scope: if i.global { Scope::Global } else { Scope::Query(fp.clone()) },
        })
        .collect())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let repo_root = std::env::current_dir()?;
    let now = now_unix();

    match cli.cmd {
        Command::Init { operator } => {
            Workspace::init_repo(&repo_root, &operator, now)?;
            println!("Initialized dtl in {}", repo_root.display());
        }
        Command::Status => {
            let ws = Workspace::open(repo_root)?;
            println!("{}", serde_json::to_string_pretty(&ws.status(now)?)?);
        }
        Command::Evidence(cmd) => evidence(Workspace::open(repo_root)?, cmd, now)?,
        Command::Run { query, draft, evidence, actor, regenerate } => {
            let ws = Workspace::open(repo_root)?;
            let text = std::fs::read_to_string(&draft).with_context(|| format!("read {}", draft.display()))?;
            let candidates = match &evidence {
                Some(p) => read_candidates(p, &fingerprint(&query))?,
                None => vec![],
            };
            let collector = StaticEvidence(candidates);
            let drafter = StaticDraft(text);
            let mut req = RunRequest::new(query, now, &collector, &drafter);
            req.actor = actor;
            req.regenerate = regenerate;

            let outcome = ws.engine().run(&req);
            println!("{}", outcome.render());
            if let RunOutcome::Aborted(f) = outcome {
                return Err(anyhow!("run aborted: {f}"));
            }
        }
        Command::Ledger(LedgerCmd::Show { run }) => {
            let ws = Workspace::open(repo_root)?;
            for e in RunLedger::new(&ws.storage).entries()? {
                if run.as_deref().is_some_and(|r| r != e.run_id.as_str()) {
                    continue;
                }
                println!("{:>5} {} {} {:<18} {:<12} {}", e.sequence, e.timestamp_unix, e.run_id, e.event_type.as_str(), e.actor, e.payload);
            }
        }
        Command::Ledger(LedgerCmd::Verify) => {
            let ws = Workspace::open(repo_root)?;
            let n = RunLedger::new(&ws.storage).verify_integrity()?;
            println!("OK ({n} entries)");
        }
        Command::Switches(SwitchesCmd::Show) => {
            let ws = Workspace::open(repo_root)?;
            let snap = ws.snapshot(now);
            println!("version {}", snap.version);
            for (switch, engaged) in snap.states() {
                println!("- {:<24} {}", switch.name(), if *engaged { "ENGAGED" } else { "off" });
            }
        }
        Command::Switches(SwitchesCmd::Set { name, off, operator }) => {
            let ws = Workspace::open(repo_root)?;
            let switch = Switch::parse(&name).ok_or_else(|| anyhow!("unknown kill switch: {name}"))?;
            let record = ws.set_switch(switch, !off, &operator, now)?;
            println!("{} -> {} (version {})", switch, if off { "off" } else { "ENGAGED" }, record.version);
        }
        Command::Export { fingerprint } => {
            let ws = Workspace::open(repo_root)?;
            let (dir, manifest) = ws.export(&Fingerprint::from_str(fingerprint))?;
            println!("Exported {} artifacts to {}", manifest.artifacts.len(), dir.display());
        }
        Command::Scenario { dir } => {
            let storage = InMemoryStorage::new();
            let result = dtl_runner::scenario::simulate(&dir, &storage)?;
            for (i, s) in result.summaries().iter().enumerate() {
                println!("run {}: {s}", i + 1);
            }
            println!("ledger: {}", result.event_names().join(" "));
        }
    }

    Ok(())
}

fn evidence(ws: Workspace, cmd: EvidenceCmd, now: i64) -> anyhow::Result<()> {
    let engine = ws.engine();
    match cmd {
        EvidenceCmd::Add { query, file } => {
            let ctx = engine.context(&query, now, "operator", None);
            let candidates = read_candidates(&file, &ctx.fingerprint)?;
            for (i, r) in engine.ingest(ctx, &candidates)?.into_iter().enumerate() {
                match r {
                    Ok(id) => println!("{i}: {id}"),
                    Err(f) => println!("{i}: rejected {f}"),
                }
            }
        }
        EvidenceCmd::Get { id } => {
            let item = ws.storage.get_evidence(&EvidenceId::from_str(id.clone()))?.ok_or_else(|| anyhow!("no evidence {id}"))?;
            println!("{}", serde_json::to_string_pretty(&item)?);
        }
        EvidenceCmd::List { query } => {
            let scope = query.map(|q| Scope::Query(fingerprint(&q)));
            let items = ws.storage.list_evidence(scope.as_ref())?;
            for item in items {
                println!(
                    "{} {:<8} {:<10} {:<16} age={}s",
                    item.id,
                    item.lifecycle.as_str(),
                    item.evidence_type.as_str(),
                    item.scope.as_key(),
                    item.age_secs(now)
                );
            }
        }
        EvidenceCmd::Expire { id } => {
            let ctx = engine.context("", now, "operator", None);
            let changed = engine.expire(ctx, &EvidenceId::from_str(id.clone()))?;
            println!("{id}: {}", if changed { "expired" } else { "still fresh, unchanged" });
        }
        EvidenceCmd::Revoke { id } => {
            let ctx = engine.context("", now, "operator", None);
            engine.revoke(ctx, &EvidenceId::from_str(id.clone()))?;
            println!("{id}: revoked");
        }
        EvidenceCmd::ExpireStale => {
            let ctx = engine.context("", now, "operator", None);
            let expired = engine.expire_stale(ctx)?;
            println!("expired {} items", expired.len());
        }
    }
    Ok(())
}
