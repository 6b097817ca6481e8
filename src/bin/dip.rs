// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use dip::{
    config::{collect_env, to_json_pretty, EnvVar, GitSettings, RemoteBranch},
    flow::{reconcile, Terminal},
    path::{contract_user, default_settings_file, expand},
    settings::Settings,
};

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};
use inquire::Confirm;
use serde_json::Value;
use std::{
    env,
    ffi::OsString,
    path::PathBuf,
    process::{exit, Command as Process},
};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  dip [options] <dip-command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<i32> {
        match self.command {
            Command::Install(opts) => run_install(opts),
            Command::Uninstall(opts) => run_uninstall(opts),
            Command::Reinstall(opts) => run_reinstall(opts),
            Command::Run(opts) => run_run(opts),
            Command::Pull(opts) => run_pull(opts),
            Command::Show(opts) => run_show(opts),
            Command::Diff(opts) => run_diff(opts),
            Command::List => run_list(),
            Command::Env(opts) => run_env(opts),
            Command::Config(opts) => run_config(opts),
            Command::Reset(opts) => run_reset(opts),
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Install docker-compose service as a command.
    #[command(override_usage = "dip install [options] <name> [<home>]")]
    Install(InstallOptions),

    /// Uninstall commands.
    #[command(override_usage = "dip uninstall <name>...")]
    Uninstall(UninstallOptions),

    /// Rewrite launcher of installed command.
    #[command(override_usage = "dip reinstall <name>")]
    Reinstall(NameOptions),

    /// Run installed command.
    #[command(override_usage = "dip run <name> [-- <args>...]")]
    Run(RunOptions),

    /// Pull docker images of installed commands.
    #[command(override_usage = "dip pull [options] [<name>...]")]
    Pull(PullOptions),

    /// Show service definition of installed command.
    #[command(override_usage = "dip show [options] <name>")]
    Show(ShowOptions),

    /// Check if local configuration diverged from remote.
    #[command(override_usage = "dip diff [options] <name>")]
    Diff(DiffOptions),

    /// List installed commands.
    #[command(override_usage = "dip list")]
    List,

    /// Print environment flags of installed command.
    #[command(override_usage = "dip env <name>")]
    Env(NameOptions),

    /// Show or edit dip settings.
    #[command(override_usage = "dip config [options] [<name> [<key>...]]")]
    Config(ConfigOptions),

    /// Delete dip settings.
    #[command(override_usage = "dip reset [options]")]
    Reset(ResetOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InstallOptions {
    /// Name of command, and of its docker-compose service.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Directory containing docker-compose file.
    #[arg(default_value = ".", value_name = "home")]
    pub home: PathBuf,

    /// Directory to write launcher into.
    #[arg(short, long, value_name = "path")]
    pub path: Option<PathBuf>,

    /// Environment variable to pass into service.
    #[arg(short, long, value_name = "key[=value]")]
    pub env: Vec<EnvVar>,

    /// Git remote to track docker-compose file against.
    #[arg(short, long, value_name = "remote[/branch]")]
    pub remote: Option<RemoteBranch>,

    /// Seconds to wait when local configuration is stale.
    #[arg(short, long, requires = "remote", value_name = "secs")]
    pub sleep: Option<u64>,

    /// Pull remote changes automatically when local configuration is stale.
    #[arg(short = 'u', long, requires = "remote")]
    pub auto_upgrade: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct UninstallOptions {
    /// Names of commands to uninstall.
    #[arg(required = true, value_name = "name")]
    pub names: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct NameOptions {
    /// Name of installed command.
    #[arg(required = true, value_name = "name")]
    pub name: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// Name of installed command.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Arguments passed to service.
    #[arg(last = true, value_name = "args")]
    pub args: Vec<OsString>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct PullOptions {
    /// Names of installed commands.
    #[arg(group = "target", value_name = "name")]
    pub names: Vec<String>,

    /// Pull every installed command.
    #[arg(short, long, group = "target")]
    pub all: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ShowOptions {
    /// Name of installed command.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Print docker-compose files as written.
    #[arg(long)]
    pub raw: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DiffOptions {
    /// Name of installed command.
    #[arg(required = true, value_name = "name")]
    pub name: String,

    /// Do not print diff output.
    #[arg(short, long)]
    pub quiet: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ConfigOptions {
    /// Name of installed command.
    #[arg(value_name = "name")]
    pub name: Option<String>,

    /// Keys to descend into.
    #[arg(requires = "name", value_name = "key")]
    pub keys: Vec<String>,

    /// Open settings file in $EDITOR.
    #[arg(short, long, conflicts_with = "name")]
    pub edit: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ResetOptions {
    /// Do not ask for confirmation.
    #[arg(short, long)]
    pub force: bool,
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    match run() {
        Ok(code) => exit(code),
        Err(error) => {
            error!("{error:#}");
            exit(1);
        }
    }
}

fn run() -> Result<i32> {
    Cli::parse().run()
}

fn run_install(opts: InstallOptions) -> Result<i32> {
    let home = expand(&opts.home)?;
    let path = opts.path.map(expand).transpose()?;
    let env = collect_env(opts.env);
    let git = opts.remote.map(|remote| GitSettings {
        auto_upgrade: opts.auto_upgrade,
        branch: remote.branch,
        remote: Some(remote.remote),
        sleep: opts.sleep,
    });

    Settings::save_on_exit(default_settings_file()?, |settings: &mut Settings| -> Result<i32> {
        settings.install(&opts.name, home, path, env, git)?;
        Ok(0)
    })
}

fn run_uninstall(opts: UninstallOptions) -> Result<i32> {
    Settings::save_on_exit(default_settings_file()?, |settings: &mut Settings| -> Result<i32> {
        settings.uninstall_many(opts.names.iter().map(String::as_str))?;
        Ok(0)
    })
}

fn run_reinstall(opts: NameOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let app = settings.get(&opts.name)?;
    app.install()?;
    info!("reinstalled {:?} to {:?}", app.name, app.executable().display());

    Ok(0)
}

fn run_run(opts: RunOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let app = reconcile(&settings, &opts.name, &mut Terminal)?;
    Ok(app.run(opts.args)?)
}

fn run_pull(opts: PullOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let names = if opts.all {
        settings.names().map(str::to_owned).collect()
    } else {
        opts.names
    };

    if names.is_empty() {
        bail!("nothing to pull, give at least one name or --all");
    }

    for name in names {
        let app = reconcile(&settings, &name, &mut Terminal)?;
        let project = app.project()?;
        project.service(&app.name)?.pull()?;
    }

    Ok(0)
}

fn run_show(opts: ShowOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let app = reconcile(&settings, &opts.name, &mut Terminal)?;

    if opts.raw {
        for definition in app.definitions()? {
            print!("{definition}");
        }
    } else {
        let project = app.project()?;
        let service = project.service(&app.name)?;
        println!("{}", to_json_pretty(&service.config_dict()?)?);
    }

    Ok(0)
}

fn run_diff(opts: DiffOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let app = settings.get(&opts.name)?;
    if app.git.is_none() {
        info!("{:?} does not track a git remote", app.name);
    }

    Ok(i32::from(app.diff(opts.quiet)?))
}

fn run_list() -> Result<i32> {
    let settings = Settings::load_default()?;
    for app in settings.iter() {
        let app = app?;
        let mut line = format!("{} {}", app.name, contract_user(&app.home));
        if let Some(git) = &app.git {
            if let Some(remote) = &git.remote {
                line.push_str(&format!(" @ {remote}"));
                if let Some(branch) = &git.branch {
                    line.push_str(&format!("/{branch}"));
                }
            }
        }
        println!("{line}");
    }

    Ok(0)
}

fn run_env(opts: NameOptions) -> Result<i32> {
    let settings = Settings::load_default()?;
    let app = settings.get(&opts.name)?;
    println!("{}", app.env_flags().join(" "));

    Ok(0)
}

fn run_config(opts: ConfigOptions) -> Result<i32> {
    let settings = Settings::load_default()?;

    if opts.edit {
        let editor = env::var("EDITOR").unwrap_or_else(|_| "vi".into());
        let status = Process::new(&editor).arg(settings.file()).status()?;
        return Ok(status.code().unwrap_or(1));
    }

    let mut value = serde_json::to_value(settings.document())?;
    for key in opts.name.iter().chain(opts.keys.iter()) {
        value = value
            .get_mut(key)
            .map(Value::take)
            .ok_or_else(|| anyhow!("no such setting {key:?}"))?;
    }

    match value {
        Value::String(text) => println!("{text}"),
        value => println!("{}", to_json_pretty(&value)?),
    }

    Ok(0)
}

fn run_reset(opts: ResetOptions) -> Result<i32> {
    let file = default_settings_file()?;
    let confirmed = opts.force
        || Confirm::new(&format!("Reset dip settings at {}?", contract_user(&file)))
            .with_default(false)
            .prompt()?;

    if !confirmed {
        info!("keep dip settings at {:?}", file.display());
        return Ok(1);
    }

    Settings::reset(&file)?;
    info!("reset dip settings at {:?}", file.display());

    Ok(0)
}
