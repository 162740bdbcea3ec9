use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use chrono::{Local, NaiveDate};
use clap::{Args, Parser, Subcommand};
use outline::export::export_file_name;
use outline::render::{render_text, rows};
use outline::storage::FileStore;
use outline::{Command, ImportMode, Origin, Placement, Session};
use tracing::{debug, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(
    name = "outline",
    about = "Nested, date-ordered to-do outline",
    version
)]
struct Cli {
    /// Enable verbose logging for debugging.
    #[arg(long, global = true)]
    verbose: bool,
    /// Store file. Defaults to the platform data dir.
    #[arg(long, global = true, env = "OUTLINE_STORE")]
    store: Option<PathBuf>,
    /// Pin "today" (YYYY-MM-DD) for date display.
    #[arg(long, global = true)]
    today: Option<NaiveDate>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print the outline.
    Show(ShowArgs),

    /// Add a root task.
    Add(AddArgs),

    /// Append an empty subtask under a task.
    AddSubtask(IdArgs),

    /// Insert an empty task right after a task, with the same date.
    AddSibling(IdArgs),

    /// Delete a task and all of its subtasks.
    Delete(IdArgs),

    /// Duplicate a task and its subtasks.
    Copy(IdArgs),

    /// Make a task the last child of its previous sibling.
    Indent(IdArgs),

    /// Move a task up one level, right after its parent.
    Outdent(IdArgs),

    /// Reorder a task next to a sibling in the same date group.
    Move(MoveArgs),

    /// Set or clear a task's date.
    SetDate(SetDateArgs),

    /// Replace a task's text.
    SetText(SetTextArgs),

    /// Flip a task's collapsed flag.
    Toggle(IdArgs),

    /// Collapse a task.
    Collapse(IdArgs),

    /// Expand a task.
    Expand(IdArgs),

    /// Collapse every task that has subtasks.
    CollapseAll,

    /// Expand every task.
    ExpandAll,

    /// Write the outline as a JSON backup.
    Export(ExportArgs),

    /// Load a JSON backup, replacing the outline unless --merge is given.
    Import(ImportArgs),
}

#[derive(Debug, Args)]
struct ShowArgs {
    /// Emit JSON rows instead of an indented tree.
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Args)]
struct AddArgs {
    /// Task text.
    text: String,
    /// Due date (YYYY-MM-DD).
    #[arg(long)]
    date: Option<String>,
}

#[derive(Debug, Args)]
struct IdArgs {
    /// Task id.
    id: String,
}

#[derive(Debug, Args)]
struct MoveArgs {
    /// Task to move.
    id: String,
    /// Sibling to drop next to.
    target: String,
    /// Place after the target instead of before it.
    #[arg(long)]
    below: bool,
}

#[derive(Debug, Args)]
struct SetDateArgs {
    id: String,
    /// New date (YYYY-MM-DD). Omit to clear.
    date: Option<String>,
}

#[derive(Debug, Args)]
struct SetTextArgs {
    id: String,
    text: String,
}

#[derive(Debug, Args)]
struct ExportArgs {
    /// Output file or directory. Defaults to a timestamped file in the current directory.
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Debug, Args)]
struct ImportArgs {
    /// JSON file produced by `export`.
    file: PathBuf,
    /// Append to the existing outline instead of replacing it.
    #[arg(long)]
    merge: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let stdout = std::io::stdout();
    run(cli, &mut stdout.lock())
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "outline=debug" } else { "outline=warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn run(cli: Cli, out: &mut impl Write) -> Result<()> {
    let store = FileStore::new(cli.store.unwrap_or_else(FileStore::default_path));
    let today = cli.today.unwrap_or_else(|| Local::now().date_naive());
    debug!(store = ?store.path(), "using store");

    match cli.command {
        Commands::Show(args) => handle_show(&store, args, today, out),
        Commands::Add(args) => handle_add(&store, args, out),
        Commands::Export(args) => handle_export(&store, args, out),
        Commands::Import(args) => handle_import(&store, args, out),
        Commands::AddSubtask(IdArgs { id }) => mutate(&store, Command::AddSubtask { parent: id.into() }, out),
        Commands::AddSibling(IdArgs { id }) => mutate(&store, Command::InsertSibling { after: id.into() }, out),
        Commands::Delete(IdArgs { id }) => mutate(&store, Command::Delete { id: id.into() }, out),
        Commands::Copy(IdArgs { id }) => mutate(&store, Command::Copy { id: id.into() }, out),
        Commands::Indent(IdArgs { id }) => mutate(&store, Command::Indent { id: id.into() }, out),
        Commands::Outdent(IdArgs { id }) => mutate(&store, Command::Outdent { id: id.into() }, out),
        Commands::Move(MoveArgs { id, target, below }) => {
            let placement = if below { Placement::Below } else { Placement::Above };
            mutate(
                &store,
                Command::Move {
                    id: id.into(),
                    target: target.into(),
                    placement,
                },
                out,
            )
        }
        Commands::SetDate(SetDateArgs { id, date }) => {
            mutate(&store, Command::SetDate { id: id.into(), date }, out)
        }
        Commands::SetText(SetTextArgs { id, text }) => {
            mutate(&store, Command::SetText { id: id.into(), text }, out)
        }
        Commands::Toggle(IdArgs { id }) => mutate(&store, Command::ToggleCollapsed { id: id.into() }, out),
        Commands::Collapse(IdArgs { id }) => mutate(
            &store,
            Command::SetCollapsed {
                id: id.into(),
                collapsed: true,
            },
            out,
        ),
        Commands::Expand(IdArgs { id }) => mutate(
            &store,
            Command::SetCollapsed {
                id: id.into(),
                collapsed: false,
            },
            out,
        ),
        Commands::CollapseAll => mutate(&store, Command::SetAllCollapsed { collapsed: true }, out),
        Commands::ExpandAll => mutate(&store, Command::SetAllCollapsed { collapsed: false }, out),
    }
}

fn open_session(store: &FileStore) -> Result<Session> {
    let (session, warning) = Session::load(store)
        .with_context(|| format!("loading outline from {:?}", store.path()))?;
    if let Some(warning) = warning {
        warn!(reason = %warning.reason, "store reset");
        eprintln!("{warning}");
    }
    Ok(session)
}

fn mutate(store: &FileStore, command: Command, out: &mut impl Write) -> Result<()> {
    let mut session = open_session(store)?;
    let outcome = session.dispatch(command, Origin::User)?;
    if outcome.changed {
        session.save(store)?;
    }
    match outcome.focus {
        Some(id) => writeln!(out, "{id}")?,
        None if !outcome.changed => writeln!(out, "No change.")?,
        None => {}
    }
    Ok(())
}

fn handle_show(store: &FileStore, args: ShowArgs, today: NaiveDate, out: &mut impl Write) -> Result<()> {
    let session = open_session(store)?;
    if args.json {
        let json = serde_json::to_string_pretty(&rows(session.outline(), today))?;
        writeln!(out, "{json}")?;
    } else if session.outline().is_empty() {
        writeln!(out, "No tasks yet.")?;
    } else {
        write!(out, "{}", render_text(session.outline(), today))?;
    }
    Ok(())
}

fn handle_add(store: &FileStore, args: AddArgs, out: &mut impl Write) -> Result<()> {
    let AddArgs { text, date } = args;
    let text = text.trim();
    if text.is_empty() {
        anyhow::bail!("task text must not be empty");
    }
    mutate(
        store,
        Command::AddRoot {
            date,
            text: text.to_string(),
        },
        out,
    )
}

fn handle_export(store: &FileStore, args: ExportArgs, out: &mut impl Write) -> Result<()> {
    let session = open_session(store)?;
    let target = resolve_export_path(args.output.as_deref());
    fs::write(&target, session.export_json()?)
        .with_context(|| format!("writing export to {:?}", target))?;
    writeln!(out, "{}", target.display())?;
    Ok(())
}

fn resolve_export_path(output: Option<&Path>) -> PathBuf {
    let name = export_file_name(Local::now().naive_local());
    match output {
        Some(path) if path.is_dir() => path.join(name),
        Some(path) => path.to_path_buf(),
        None => PathBuf::from(name),
    }
}

fn handle_import(store: &FileStore, args: ImportArgs, out: &mut impl Write) -> Result<()> {
    let ImportArgs { file, merge } = args;
    let mode = if merge { ImportMode::Merge } else { ImportMode::Replace };
    let mut session = open_session(store)?;

    let ticket = session.begin_import()?;
    let text = match fs::read_to_string(&file) {
        Ok(text) => text,
        Err(err) => {
            session.abandon_import(ticket);
            return Err(err).with_context(|| format!("reading import file {:?}", file));
        }
    };
    let summary = session.finish_import(ticket, &text, mode)?;
    session.save(store)?;

    writeln!(
        out,
        "Imported {} task(s) ({} at top level).",
        summary.total_tasks, summary.root_tasks
    )?;
    for (fresh, original) in &summary.reassigned {
        writeln!(out, "Duplicate id {original} renamed to {fresh}.")?;
    }
    Ok(())
}
