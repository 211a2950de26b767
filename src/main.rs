use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use runstream::config::Config;
use runstream::connection::WsTransport;
use runstream::history::{read_jsonl, EventSource, HttpHistory};
use runstream::logging::{self, obj, v_num, v_str, Domain};
use runstream::monitor::{RunMonitor, Session};
use runstream::registry::TypeRegistry;
use runstream::render::{install_builtin_handlers, Router};
use runstream::sequencer::StepSnapshot;
use runstream::ticker::PriceTick;

const PRICE_CHANNEL: &str = "prices";
const USAGE: &str =
    "usage: runstream watch <run_id> | replay <file.jsonl> [run_id] | tickers <T1> [T2...] | render <file.json>";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((command, rest)) = args.split_first() else {
        bail!(USAGE);
    };
    logging::info(
        Domain::System,
        "startup",
        obj(&[("version", v_str(env!("CARGO_PKG_VERSION"))), ("command", v_str(command))]),
    );

    match command.as_str() {
        "watch" => {
            let run_id = rest.first().ok_or_else(|| anyhow!(USAGE))?;
            watch(run_id).await
        }
        "replay" => {
            let path = rest.first().ok_or_else(|| anyhow!(USAGE))?;
            replay(Path::new(path), rest.get(1).map(String::as_str))
        }
        "tickers" => {
            if rest.is_empty() {
                bail!(USAGE);
            }
            tickers(rest.to_vec()).await
        }
        "render" => {
            let path = rest.first().ok_or_else(|| anyhow!(USAGE))?;
            render(Path::new(path))
        }
        _ => bail!(USAGE),
    }
}

/// Print steps that are new or were replaced since `prev`.
fn print_changes(prev: &StepSnapshot, next: &StepSnapshot) -> Result<()> {
    for step in next.changed_since(prev) {
        println!("{}", serde_json::to_string(step)?);
    }
    Ok(())
}

async fn watch(run_id: &str) -> Result<()> {
    let config = Config::from_env();
    let history = HttpHistory::new(config.clone())?;
    let mut session = Session::new(Arc::new(WsTransport), config);
    let monitor = session.watch_run(run_id, Some(&history as &dyn EventSource)).await?;

    let mut updates = monitor.updates();
    let mut connected = monitor.connected();
    let mut shown = StepSnapshot::default();
    let current = monitor.snapshot();
    print_changes(&shown, &current)?;
    shown = current;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = monitor.snapshot();
                print_changes(&shown, &current)?;
                shown = current;
            }
            changed = connected.changed() => {
                if changed.is_err() {
                    break;
                }
                let up = *connected.borrow();
                logging::info(
                    Domain::System,
                    if up { "live" } else { "offline" },
                    obj(&[("run_id", v_str(run_id))]),
                );
            }
        }
    }

    session.stop_all();
    log_summary(&monitor);
    Ok(())
}

fn replay(path: &Path, run_id: Option<&str>) -> Result<()> {
    let events = read_jsonl(path)?;
    let Some(run_id) = run_id.or_else(|| events.first().map(|e| e.run_id.as_str())) else {
        logging::warn(Domain::System, "replay_empty", obj(&[("path", v_str(&path.display().to_string()))]));
        return Ok(());
    };
    let monitor = RunMonitor::new(run_id);
    monitor.seed(&events);
    print_changes(&StepSnapshot::default(), &monitor.snapshot())?;
    log_summary(&monitor);
    Ok(())
}

fn log_summary(monitor: &RunMonitor) {
    let stats = monitor.stats();
    logging::info(
        Domain::System,
        "summary",
        obj(&[
            ("run_id", v_str(monitor.run_id())),
            ("steps", v_num(monitor.snapshot().len() as f64)),
            ("received", v_num(stats.received as f64)),
            ("replaced", v_num(stats.replaced as f64)),
            ("duplicates", v_num(stats.duplicates as f64)),
            ("no_step", v_num(stats.no_step as f64)),
            ("malformed", v_num(stats.malformed as f64)),
        ]),
    );
}

fn tick_line(tick: &PriceTick) -> String {
    match (tick.change, tick.change_percent) {
        (Some(change), Some(pct)) => format!("{:<8} {:>12.2} {:+.2} ({:+.2}%)", tick.ticker, tick.price, change, pct),
        (Some(change), None) => format!("{:<8} {:>12.2} {:+.2}", tick.ticker, tick.price, change),
        _ => format!("{:<8} {:>12.2}", tick.ticker, tick.price),
    }
}

async fn tickers(symbols: Vec<String>) -> Result<()> {
    let mut session = Session::new(Arc::new(WsTransport), Config::from_env());
    let monitor = session.watch_tickers(PRICE_CHANNEL, symbols)?;
    let mut updates = monitor.updates();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                for tick in monitor.snapshot() {
                    println!("{}", tick_line(&tick));
                }
                println!();
            }
        }
    }

    session.stop_all();
    Ok(())
}

fn render(path: &Path) -> Result<()> {
    let text = std::fs::read_to_string(path).with_context(|| format!("cannot read {}", path.display()))?;
    let payload: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("{} is not JSON", path.display()))?;

    let mut registry = TypeRegistry::new();
    install_builtin_handlers(&mut registry);
    let presentation = Router::new(&registry).render(&payload);

    println!("{} [{}]", presentation.title, presentation.handler);
    for line in &presentation.lines {
        println!("{}", line);
    }
    Ok(())
}
