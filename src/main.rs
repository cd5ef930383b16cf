use std::env;

use actix::Actor;
use anyhow::{bail, Context};
use gradient_stream::{
    console::ConsoleView,
    stream::{Coordinator, CoordinatorState, CoordinatorUpdate, GetSnapshot, RunTraining, Shutdown},
    DemoConfig,
};
use log::info;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};

const USAGE: &str = "usage: gradient-stream [--json] [CONFIG.json]";

struct CliArgs {
    config: Option<String>,
    json: bool,
    help: bool,
}

impl CliArgs {
    fn parse<I: Iterator<Item = String>>(args: I) -> anyhow::Result<Self> {
        let mut config = None;
        let mut json = false;
        let mut help = false;

        for arg in args {
            match arg.as_str() {
                "--json" => json = true,
                "-h" | "--help" => help = true,
                flag if flag.starts_with('-') => bail!("unknown flag '{flag}'\n{USAGE}"),
                path if config.is_none() => config = Some(path.to_string()),
                extra => bail!("unexpected argument '{extra}'\n{USAGE}"),
            }
        }

        Ok(Self { config, json, help })
    }
}

fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = CliArgs::parse(env::args().skip(1))?;
    if args.help {
        println!("{USAGE}");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => DemoConfig::from_file(path)
            .with_context(|| format!("failed to load config from {path}"))?,
        None => DemoConfig::default(),
    };

    actix_rt::System::new().block_on(run(config, args.json))
}

async fn run(config: DemoConfig, json: bool) -> anyhow::Result<()> {
    let view = ConsoleView::new(json, config.report_every);
    let (tx, mut updates) = unbounded_channel();
    let coordinator = Coordinator::new(config.loader()).with_updates(tx).start();

    let state = wait_for(&mut updates, &view, |update| {
        matches!(
            update,
            CoordinatorUpdate::StateChanged {
                state: CoordinatorState::Ready | CoordinatorState::Failed
            }
        )
    })
    .await?;
    if state != Some(CoordinatorState::Ready) {
        bail!("compute engine failed to load");
    }

    for &learning_rate in &config.learning_rates {
        info!(learning_rate = learning_rate; "requesting session");
        coordinator
            .send(RunTraining { learning_rate })
            .await
            .context("coordinator mailbox closed")?
            .with_context(|| format!("run at learning rate {learning_rate} was refused"))?;

        wait_for(&mut updates, &view, |update| {
            matches!(update, CoordinatorUpdate::SessionSettled { .. })
        })
        .await?;

        let snapshot = coordinator.send(GetSnapshot).await?;
        if !json {
            view.summary(&snapshot).iter().for_each(|line| println!("  {line}"));
        }
        if snapshot.state == CoordinatorState::Failed {
            bail!("compute channel is no longer usable");
        }
    }

    coordinator.send(Shutdown).await?;
    Ok(())
}

/// Prints updates until one matches `done`, returning the last state seen.
async fn wait_for<F>(
    updates: &mut UnboundedReceiver<CoordinatorUpdate>,
    view: &ConsoleView,
    done: F,
) -> anyhow::Result<Option<CoordinatorState>>
where
    F: Fn(&CoordinatorUpdate) -> bool,
{
    let mut state = None;
    while let Some(update) = updates.recv().await {
        if let Some(line) = view.render(&update) {
            println!("{line}");
        }
        if let CoordinatorUpdate::StateChanged { state: next } = update {
            state = Some(next);
        }
        if done(&update) {
            return Ok(state);
        }
    }

    bail!("coordinator closed its update stream")
}
