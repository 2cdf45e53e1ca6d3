//! Analysis CLI: expand seed assets and print approvers, stakeholders and
//! peer reviewers. Ctrl-C stops between seeds and prints the partial result.

use clap::Parser;
use impactmap::impact::ManualParty;
use impactmap::models::{ImpactedPartyRecord, PartyRole};
use impactmap::risk::{self, ChangeType, ReviewerSelection, RiskAssessment};
use impactmap::{AnalysisContext, CancellationToken, Config};

#[derive(Parser, Debug)]
#[command(name = "analyze")]
struct Args {
    /// Seed asset ids (display ids work too).
    #[arg(required = true)]
    seeds: Vec<u64>,

    /// Requester id, excluded from peer reviewers.
    #[arg(long)]
    requester: Option<u64>,

    /// Implementer id, included in peer reviewers.
    #[arg(long)]
    implementer: Option<u64>,

    /// Change type (minor, standard, major, emergency) for the risk decision.
    #[arg(long)]
    change_type: Option<String>,

    /// Risk questionnaire total (5 to 15) for the risk decision.
    #[arg(long)]
    risk_score: Option<u32>,

    /// Add a person as approver by id (repeatable).
    #[arg(long = "add-approver")]
    add_approvers: Vec<u64>,

    /// Add a person as stakeholder by id (repeatable).
    #[arg(long = "add-stakeholder")]
    add_stakeholders: Vec<u64>,

    /// Print the full report as JSON.
    #[arg(long)]
    json: bool,
}

fn print_parties(title: &str, parties: &[ImpactedPartyRecord]) {
    println!("{} ({}):", title, parties.len());
    for party in parties {
        println!(
            "  {:<8} {:<30} {:<30} {}",
            party.id,
            party.name,
            party.email.as_deref().unwrap_or("-"),
            party.source
        );
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or("RUST_LOG", "warn")).init();

    let args = Args::parse();
    let config = Config::load()?;
    let context = AnalysisContext::from_config(&config).await?;

    let token = CancellationToken::new();
    let on_interrupt = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("Interrupted; finishing the current seed");
            on_interrupt.cancel();
        }
    });

    let mut report = context.run_for_ids(&args.seeds, &token).await?;

    let manual: Vec<ManualParty> = args
        .add_approvers
        .iter()
        .map(|id| ManualParty { id: *id, role: PartyRole::Approver })
        .chain(
            args.add_stakeholders
                .iter()
                .map(|id| ManualParty { id: *id, role: PartyRole::Stakeholder }),
        )
        .collect();
    context.add_manual_parties(&mut report, &manual).await;
    let reviewers = report.peer_reviewers(args.requester, args.implementer);

    if args.json {
        let out = serde_json::json!({ "report": report, "peer_reviewers": reviewers });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!("\nRun {}", report.run_id);
    println!(
        "{} seed assets, {} related assets{}\n",
        report.seeds.len(),
        report.related.len(),
        if report.cancelled { " (cancelled, partial)" } else { "" }
    );
    print_parties("Approvers", report.parties.approvers());
    println!();
    print_parties("Stakeholders", report.parties.stakeholders());

    if let (Some(change_type), Some(score)) = (args.change_type.as_deref(), args.risk_score) {
        let change_type = ChangeType::parse(change_type)
            .ok_or_else(|| anyhow::anyhow!("Unknown change type '{}'", change_type))?;
        let decision = risk::decide(&change_type, &RiskAssessment::from_total(score), report.seeds.len());
        println!(
            "\nPriority {}  Impact {}  Risk {}  Peer review {}",
            decision.priority,
            decision.impact,
            decision.risk,
            if decision.peer_review_required { "required" } else { "not required" }
        );
        if decision.peer_review_required {
            match reviewers {
                ReviewerSelection::Reviewers(ids) => println!("Peer reviewers: {:?}", ids),
                ReviewerSelection::NoneIdentified => println!("Peer reviewers: none identified"),
            }
        }
    }

    if !report.warnings.is_empty() {
        println!("\nWarnings:");
        for warning in &report.warnings {
            println!("  - {}", warning);
        }
    }

    Ok(())
}
