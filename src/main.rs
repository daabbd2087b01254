// story-loom: inspect, edit and (re)encrypt story graph files
// Build with: cargo build --bin story-loom

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Arg, ArgAction, ArgMatches, Command};
use tokio::sync::Mutex;

use story_loom::graph_utils::graph::{GraphModel, Position};
use story_loom::persistence::autosave::Autosaver;
use story_loom::persistence::codec;
use story_loom::persistence::persist::{self, FileStore, PersistenceService};
use story_loom::persistence::settings::AppSettings;

fn password_arg() -> Arg {
    Arg::new("password").short('p').long("password").value_name("PASSPHRASE").help("Passphrase for encrypted files")
}

fn file_arg() -> Arg {
    Arg::new("file").required(true).value_name("FILE").help("Story file")
}

// Positions must stay representable in JSON.
fn finite_coord(s: &str) -> Result<f64, String> {
    let v: f64 = s.parse().map_err(|e| format!("{e}"))?;
    if v.is_finite() { Ok(v) } else { Err(format!("{s} is not a finite number")) }
}

fn on_off(s: &str) -> Result<bool, String> {
    match s {
        "on" | "true" => Ok(true),
        "off" | "false" => Ok(false),
        _ => Err(format!("expected on or off, got {s}")),
    }
}

fn cli() -> Command {
    Command::new("story-loom")
        .about("Story-Loom: inspect, edit and encrypt story graph files")
        .subcommand_required(true)
        .arg(Arg::new("autosave_dir").long("autosave-dir").value_name("DIR").help("Override the autosave directory"))
        .subcommand(
            Command::new("new")
                .about("Write an empty story")
                .arg(Arg::new("file").value_name("FILE").help("Story file (defaults to the configured file name)"))
                .arg(password_arg()),
        )
        .subcommand(Command::new("inspect").about("Print node and connection counts").arg(file_arg()).arg(password_arg()))
        .subcommand(
            Command::new("add-node")
                .about("Append an empty node and print its id")
                .arg(file_arg())
                .arg(Arg::new("x").long("x").default_value("0").allow_hyphen_values(true).value_parser(finite_coord))
                .arg(Arg::new("y").long("y").default_value("0").allow_hyphen_values(true).value_parser(finite_coord))
                .arg(Arg::new("text").long("text").value_name("TEXT"))
                .arg(password_arg()),
        )
        .subcommand(
            Command::new("connect")
                .about("Connect two existing nodes")
                .arg(file_arg())
                .arg(Arg::new("from").required(true))
                .arg(Arg::new("to").required(true))
                .arg(password_arg()),
        )
        .subcommand(
            Command::new("encrypt")
                .about("Encrypt a plain story file")
                .arg(Arg::new("input").required(true))
                .arg(Arg::new("output").required(true))
                .arg(password_arg().required(true)),
        )
        .subcommand(
            Command::new("decrypt")
                .about("Decrypt an encrypted story file")
                .arg(Arg::new("input").required(true))
                .arg(Arg::new("output").required(true))
                .arg(password_arg().required(true)),
        )
        .subcommand(
            Command::new("autosave")
                .about("Load a story and autosave it until interrupted")
                .arg(file_arg())
                .arg(password_arg())
                .arg(Arg::new("interval").long("interval").value_name("SECS").value_parser(clap::value_parser!(u64)))
                .arg(Arg::new("versioned").long("versioned").action(ArgAction::SetTrue)),
        )
        .subcommand(
            Command::new("settings")
                .about("Show or change the saved settings")
                .arg(Arg::new("autosave").long("autosave").value_name("on|off").value_parser(on_off))
                .arg(Arg::new("interval").long("interval").value_name("SECS").value_parser(clap::value_parser!(u64)))
                .arg(Arg::new("versioned").long("versioned").value_name("on|off").value_parser(on_off))
                .arg(Arg::new("dir").long("dir").value_name("DIR").help("Autosave directory"))
                .arg(Arg::new("file_name").long("file-name").value_name("NAME").help("Default story file name")),
        )
}

fn password(m: &ArgMatches) -> Option<&str> {
    m.get_one::<String>("password").map(String::as_str)
}

fn path_of(m: &ArgMatches, id: &str) -> PathBuf {
    m.get_one::<String>(id).map(PathBuf::from).unwrap_or_default()
}

async fn load_model(service: &PersistenceService, path: &Path, pass: Option<&str>) -> anyhow::Result<GraphModel> {
    let bytes = persist::read_file(path).with_context(|| format!("reading {}", path.display()))?;
    if pass.is_none() && codec::looks_encrypted(&bytes) {
        anyhow::bail!("{} is encrypted; pass --password", path.display());
    }
    let mut model = GraphModel::new();
    service.load(&mut model, &bytes, pass).await?;
    Ok(model)
}

async fn store_model(service: &PersistenceService, model: &GraphModel, path: &Path, pass: Option<&str>) -> anyhow::Result<()> {
    let bytes = service.save(model, pass).await?;
    persist::write_file(path, &bytes).with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let matches = cli().get_matches();

    if let Some(dir) = matches.get_one::<String>("autosave_dir") {
        let mut settings = AppSettings::load().unwrap_or_default();
        settings.autosave_override = Some(PathBuf::from(dir));
        AppSettings::set_override(settings);
    }
    let settings = AppSettings::current();
    let service = PersistenceService::new()?;

    match matches.subcommand() {
        Some(("new", m)) => {
            let path = m
                .get_one::<String>("file")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(&settings.default_file_name));
            store_model(&service, &GraphModel::new(), &path, password(m)).await?;
            println!("wrote {}", path.display());
        }
        Some(("inspect", m)) => {
            let model = load_model(&service, &path_of(m, "file"), password(m)).await?;
            println!("nodes: {}", model.node_count());
            println!("connection records: {}", model.connection_count());
            for (from, to) in model.dangling_connections() {
                println!("dangling: {} -> {}", from, to);
            }
        }
        Some(("add-node", m)) => {
            let path = path_of(m, "file");
            let mut model = load_model(&service, &path, password(m)).await?;
            let x = m.get_one::<f64>("x").copied().unwrap_or_default();
            let y = m.get_one::<f64>("y").copied().unwrap_or_default();
            let id = model.add_node(Position::new(x, y));
            if let Some(text) = m.get_one::<String>("text") {
                model.set_text(&id, text.clone());
            }
            store_model(&service, &model, &path, password(m)).await?;
            println!("{}", id);
        }
        Some(("connect", m)) => {
            let path = path_of(m, "file");
            let mut model = load_model(&service, &path, password(m)).await?;
            let from = m.get_one::<String>("from").map(String::as_str).unwrap_or_default();
            let to = m.get_one::<String>("to").map(String::as_str).unwrap_or_default();
            if !model.connect(from, to) {
                anyhow::bail!("both {} and {} must be existing node ids", from, to);
            }
            store_model(&service, &model, &path, password(m)).await?;
        }
        Some((cmd @ ("encrypt" | "decrypt"), m)) => {
            let input = path_of(m, "input");
            let output = path_of(m, "output");
            let bytes = persist::read_file(&input).with_context(|| format!("reading {}", input.display()))?;
            let converted = if cmd == "encrypt" {
                service.convert(&bytes, None, password(m)).await?
            } else {
                service.convert(&bytes, password(m), None).await?
            };
            persist::write_file(&output, &converted).with_context(|| format!("writing {}", output.display()))?;
            println!("wrote {}", output.display());
        }
        Some(("autosave", m)) => {
            let pass = password(m).map(str::to_string);
            let model = load_model(&service, &path_of(m, "file"), pass.as_deref()).await?;
            let Some(mut config) = settings.autosave_plan(pass) else {
                anyhow::bail!("autosave is off; enable it with `story-loom settings --autosave on`");
            };
            if let Some(secs) = m.get_one::<u64>("interval") {
                config.interval = std::time::Duration::from_secs((*secs).max(1));
            }
            config.versioned |= m.get_flag("versioned");
            let dir = settings.autosave_dir();
            println!("autosaving to {} (Ctrl-C to stop)", dir.display());
            let handle = Autosaver::spawn(Arc::new(Mutex::new(model)), service.clone(), Arc::new(FileStore::new(dir)), config);
            tokio::signal::ctrl_c().await?;
            println!("saved {} time(s), skipped {}", handle.stats().saved(), handle.stats().skipped());
            handle.stop();
        }
        Some(("settings", m)) => {
            let mut saved = AppSettings::load().context("reading settings")?;
            let before = saved.clone();
            if let Some(on) = m.get_one::<bool>("autosave") {
                saved.autosave_enabled = *on;
            }
            if let Some(secs) = m.get_one::<u64>("interval") {
                saved.autosave_interval_secs = (*secs).max(1);
            }
            if let Some(on) = m.get_one::<bool>("versioned") {
                saved.versioned_autosaves = *on;
            }
            if let Some(dir) = m.get_one::<String>("dir") {
                saved.autosave_override = Some(PathBuf::from(dir));
            }
            if let Some(name) = m.get_one::<String>("file_name") {
                saved.default_file_name = name.clone();
            }
            if saved != before {
                let path = saved.save().context("writing settings")?;
                println!("wrote {}", path.display());
            }
            println!("{}", serde_json::to_string_pretty(&saved)?);
        }
        _ => unreachable!("subcommand_required"),
    }
    Ok(())
}
