//! credit-runner: operator CLI for the BNPL credit engine.
//!
//! Usage:
//!   credit-runner migrate  --db credit.db
//!   credit-runner demo     --db credit.db --data-dir ./data
//!   credit-runner sweep    --db credit.db
//!   credit-runner schedule --db credit.db
//!   credit-runner recalc   --db credit.db --user 7
//!   credit-runner profile  --db credit.db --user 7 --page 1 --page-size 20

use anyhow::{bail, Context, Result};
use bnpl_credit_core::{
    clock::DailySchedule,
    config::CreditConfig,
    engine::CreditEngine,
    ledger::{CreditProfile, ScoreHistory},
    loans::NewLoan,
    store::CreditStore,
    types::{DocumentStatus, DocumentType},
};
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::env;
use std::path::Path;

#[derive(serde::Serialize)]
struct ProfileReport {
    profile: CreditProfile,
    history: ScoreHistory,
    chain_intact: bool,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let command = args.get(1).map(String::as_str).unwrap_or("help");
    let db = flag(&args, "--db").unwrap_or("credit.db");
    let data_dir = flag(&args, "--data-dir").unwrap_or("./data");

    if command == "help" || command == "--help" {
        print_usage();
        return Ok(());
    }

    let config = load_config(data_dir)?;
    let store = CreditStore::open(db).with_context(|| format!("opening {db}"))?;
    let engine = CreditEngine::build(config, store)?;

    match command {
        "migrate" => println!("schema up to date in {db}"),
        "demo" => run_demo(&engine)?,
        "sweep" => {
            let summary = engine.run_daily_collections_sweep();
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        "schedule" => run_schedule(&engine)?,
        "recalc" => {
            let user = parse_arg(&args, "--user", 0i64);
            let (profile, breakdown) = engine.recalculate_full_score(user)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "profile": profile,
                    "breakdown": breakdown,
                }))?
            );
        }
        "profile" => {
            let user = parse_arg(&args, "--user", 0i64);
            print_profile(&engine, user, parse_arg(&args, "--page", 1u32), parse_arg(&args, "--page-size", 20u32))?;
        }
        other => {
            print_usage();
            bail!("unknown command '{other}'");
        }
    }
    Ok(())
}

fn load_config(data_dir: &str) -> Result<CreditConfig> {
    let path = Path::new(data_dir).join("credit_policy.json");
    if path.exists() {
        return CreditConfig::load(data_dir);
    }
    log::warn!("{} not found, using the built-in policy", path.display());
    let config = CreditConfig::standard();
    config.validate()?;
    Ok(config)
}

/// Sleep until each daily slot and run the sweep. Runs until killed.
fn run_schedule(engine: &CreditEngine) -> Result<()> {
    let schedule = DailySchedule::from_config(&engine.config().schedule)
        .context("schedule time is not a valid time of day")?;
    loop {
        let now = Utc::now();
        let next = schedule.next_run_after(now);
        log::info!("next collections sweep at {next}");
        std::thread::sleep(schedule.until_next_run(now));

        let summary = engine.run_daily_collections_sweep();
        println!("{}", serde_json::to_string(&summary)?);
    }
}

/// Seed one borrower with documents, a loan and a mixed repayment record,
/// then sweep and print the result.
fn run_demo(engine: &CreditEngine) -> Result<()> {
    let (customer, profile) = engine.register_customer("Demo Borrower", "+256 700 123 456")?;
    let user = customer.customer_id;
    println!("registered customer {user} at score {} ({})", profile.score, profile.tier);

    for document_type in [DocumentType::BankStatement, DocumentType::Payslip, DocumentType::Other] {
        let doc = engine.submit_document(user, document_type)?;
        let outcome = engine.review_document(doc.document_id, DocumentStatus::Approved)?;
        println!("approved {document_type}: score {}", outcome.profile.score);
    }

    let start = Utc::now() - Duration::days(100);
    let loan = engine.create_loan(&NewLoan {
        customer_id:       user,
        lender_id:         1,
        product_id:        1,
        principal_amount:  Decimal::new(150_000, 0),
        deposit_amount:    Decimal::new(30_000, 0),
        total_amount:      Decimal::new(180_000, 0),
        installment_count: 3,
        start_date:        start,
    })?;
    println!("loan {} opened with {} installments", loan.loan.loan_id, loan.installments.len());

    let on_time = &loan.installments[0];
    let receipt = engine.record_installment_payment(on_time.installment_id, on_time.due_date - Duration::days(1))?;
    println!("installment 1 {:?}: score {}", receipt.classification.class, receipt.score.profile.score);

    let late = &loan.installments[1];
    let receipt = engine.record_installment_payment(late.installment_id, late.due_date + Duration::days(8))?;
    println!("installment 2 {:?}: score {}", receipt.classification.class, receipt.score.profile.score);

    let summary = engine.run_daily_collections_sweep();
    println!("{}", serde_json::to_string_pretty(&summary)?);

    print_profile(engine, user, 1, 20)
}

fn print_profile(engine: &CreditEngine, user: i64, page: u32, page_size: u32) -> Result<()> {
    let report = ProfileReport {
        profile: engine.get_or_create_profile(user)?,
        history: engine.score_history(user, page, page_size)?,
        chain_intact: engine.verify_ledger_chain(user)?.is_none(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn print_usage() {
    println!("credit-runner <migrate|demo|sweep|schedule|recalc|profile> [--db PATH] [--data-dir DIR] [--user ID]");
}

fn flag<'a>(args: &'a [String], name: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == name).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}
