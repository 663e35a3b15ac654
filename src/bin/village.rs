// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use village::{
    api::{ApiError, CreateScriptInput, RunScriptInput, VillageClient},
    auth::{
        device::{DeviceFlow, DeviceFlowError},
        login_and_bootstrap,
        oauth::{AuthorizationServer, HttpAuthorizationServer},
        AuthError, TokenManager, TokenSet,
    },
    config::{DeploymentConfig, Engine, Settings},
    deploy::{DeployError, Deployer, Project},
    path::{village_home_dir, CONFIG_FILE},
    report::{table, time_since, warn_unauthenticated},
    store::CredentialStore,
    workspace::{default_workspace_id, set_default},
};

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use indicatif::ProgressBar;
use inquire::{Confirm, Select, Text};
use std::{
    collections::BTreeMap,
    env::current_dir,
    fs::read_to_string,
    path::{Path, PathBuf},
    process::exit,
};
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "village [options] <command>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Show full errors and internal logging.
    #[arg(short, long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    async fn run(self) -> Result<()> {
        let session = Session::open()?;
        match self.command {
            Command::Login => run_login(&session).await,
            Command::Logout => run_logout(&session),
            Command::Init(opts) => run_init(&session, opts).await,
            Command::Deploy => run_deploy(&session).await,
            Command::Setup(opts) => run_setup(&session, opts).await,
            Command::Run(opts) => run_run(&session, opts).await,
            Command::List(opts) => run_list(&session, opts.target).await,
            Command::Remove(opts) => run_remove(&session, opts).await,
            Command::Token => run_token(&session).await,
            Command::Userinfo => run_userinfo(&session).await,
            Command::Workspace => run_workspace(&session).await,
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Log in to Village.
    Login,

    /// Log out of Village.
    Logout,

    /// Register a new script.
    #[command(override_usage = "village init [options]")]
    Init(InitOptions),

    /// Deploy script of the enclosing project as a new build.
    Deploy,

    /// Set up local project for an existing script.
    #[command(override_usage = "village setup [options] <id>")]
    Setup(SetupOptions),

    /// Run the latest build of a script.
    #[command(override_usage = "village run [options] <script_id> [-p <key=value>...]")]
    Run(RunOptions),

    /// List platform entities.
    List(ListOptions),

    /// Remove a script.
    #[command(override_usage = "village remove [options] <id>")]
    Remove(RemoveOptions),

    /// Print a valid access token.
    Token,

    /// Print profile of the logged in user.
    Userinfo,

    /// Choose default workspace.
    Workspace,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Register script from an existing village.yaml.
    #[arg(long, value_name = "path")]
    pub from: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct SetupOptions {
    /// ID of the script to set up.
    #[arg(required = true, value_name = "id")]
    pub id: String,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RunOptions {
    /// ID of the script to run.
    #[arg(required = true, value_name = "script_id")]
    pub script_id: String,

    /// Parameters to pass to the script.
    #[arg(short, long, num_args = 1.., value_name = "key=value")]
    pub params: Vec<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct ListOptions {
    #[command(subcommand)]
    pub target: ListTarget,
}

#[derive(Debug, Clone, Subcommand)]
enum ListTarget {
    /// List builds of a script.
    Builds {
        #[arg(value_name = "script_id")]
        id: String,
    },

    /// List runs of a script.
    Runs {
        #[arg(value_name = "script_id")]
        id: String,
    },

    /// List schedules of a script.
    Schedules {
        #[arg(value_name = "script_id")]
        id: String,
    },

    /// List scripts of a workspace.
    Scripts {
        #[arg(value_name = "workspace_id")]
        id: String,
    },

    /// List workspaces you are a member of.
    Workspaces,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct RemoveOptions {
    /// ID of the script to remove.
    #[arg(required = true, value_name = "id")]
    pub id: String,
}

/// Error that has already been explained to the user.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
struct Reported(#[from] anyhow::Error);

fn reported(err: impl Into<anyhow::Error>) -> anyhow::Error {
    Reported(err.into()).into()
}

/// Per-invocation state.
struct Session {
    settings: Settings,
    store: CredentialStore,
}

impl Session {
    fn open() -> Result<Self> {
        Ok(Self {
            settings: Settings::load()?,
            store: CredentialStore::open(village_home_dir()?),
        })
    }

    fn server(&self) -> HttpAuthorizationServer {
        HttpAuthorizationServer::from_settings(&self.settings)
    }

    fn token_manager(&self) -> TokenManager<HttpAuthorizationServer> {
        TokenManager::new(self.store.clone(), self.server())
    }

    async fn tokens(&self) -> Result<TokenSet> {
        match self.token_manager().valid_tokens().await {
            Ok(tokens) => Ok(tokens),
            Err(err @ AuthError::NotLoggedIn) => {
                error!("You're not logged in. Run `village login` to log in.");
                Err(reported(err))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn client(&self) -> Result<VillageClient> {
        let tokens = self.tokens().await?;
        Ok(VillageClient::new(
            self.settings.api_base_url.as_str(),
            tokens.access_token,
        ))
    }
}

/// Turn platform failure into a command failure, explaining it where we can.
fn api_failure(err: ApiError, not_found: Option<String>) -> anyhow::Error {
    if warn_unauthenticated(&err) {
        return reported(err);
    }

    match not_found {
        Some(message) if err.is_not_found() => {
            error!("{message}");
            reported(err)
        }
        _ => err.into(),
    }
}

fn confirm_overwrite(dir: &Path) -> Result<bool> {
    if !dir.join(CONFIG_FILE).exists() {
        return Ok(true);
    }

    Ok(Confirm::new(&format!("{CONFIG_FILE} already exists. Overwrite?"))
        .with_default(false)
        .prompt()?)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let debug = cli.debug;

    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let default_filter = if debug { "info,village=debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = cli.run().await {
        if debug {
            error!("{error:?}");
        } else if error.downcast_ref::<Reported>().is_none() {
            error!("{error}");
        }
        exit(1);
    }

    exit(0)
}

async fn run_login(session: &Session) -> Result<()> {
    let server = session.server();
    let flow = DeviceFlow::new(&server).with_progress(ProgressBar::new_spinner());
    match login_and_bootstrap(&flow, &session.store, &session.settings.api_base_url).await {
        Ok(_) => Ok(()),
        Err(AuthError::DeviceFlow(err @ (DeviceFlowError::Expired | DeviceFlowError::Denied))) => {
            Err(reported(err))
        }
        Err(err) => Err(err.into()),
    }
}

fn run_logout(session: &Session) -> Result<()> {
    session.store.clear()?;
    info!("Logged out of Village");

    Ok(())
}

async fn run_init(session: &Session, opts: InitOptions) -> Result<()> {
    match opts.from {
        Some(from) => run_init_from(session, from).await,
        None => run_init_interactive(session).await,
    }
}

async fn run_init_from(session: &Session, from: String) -> Result<()> {
    let path = PathBuf::from(shellexpand::full(&from)?.into_owned());
    if !path.is_file() {
        error!("Config file {from} does not exist");
        return Err(reported(anyhow!("missing config file {from}")));
    }

    let config: DeploymentConfig = read_to_string(&path)?.parse()?;
    let Some(workspace_id) = default_workspace_id(&session.store) else {
        error!("No default workspace found");
        return Err(reported(anyhow!("no default workspace")));
    };

    let client = session.client().await?;
    let input = CreateScriptInput {
        id: Some(config.id),
        name: config.name,
        workspace_id,
        description: None,
        engine: config.engine,
        engine_version: config.engine_version,
    };
    let script = client
        .create_script(&input)
        .await
        .map_err(create_failure)?;
    info!("Created script {} ({})", script.name, script.id);

    Ok(())
}

async fn run_init_interactive(session: &Session) -> Result<()> {
    let cwd = current_dir()?;
    if !confirm_overwrite(&cwd)? {
        return Ok(());
    }

    let client = session.client().await?;
    let default_workspace = default_workspace_id(&session.store);

    let name = Text::new("Script name:").prompt()?;
    let id = Text::new("Script id (leave blank to autogenerate):").prompt()?;
    let mut workspace_prompt = Text::new("Workspace ID:");
    if let Some(workspace_id) = default_workspace.as_deref() {
        workspace_prompt = workspace_prompt.with_default(workspace_id);
    }
    let workspace_id = workspace_prompt.prompt()?;
    let description = Text::new("Script description:").prompt()?;
    let engine = Select::new("Script engine:", Engine::ALL.to_vec()).prompt()?;
    let engine_version = Select::new("Engine version:", engine.versions().to_vec()).prompt()?;

    let input = CreateScriptInput {
        id: Some(id).filter(|id| !id.trim().is_empty()),
        name,
        workspace_id,
        description: Some(description).filter(|text| !text.is_empty()),
        engine,
        engine_version: engine_version.to_string(),
    };
    let script = client
        .create_script(&input)
        .await
        .map_err(create_failure)?;

    Project::initialize(
        cwd,
        DeploymentConfig {
            id: script.id,
            name: script.name,
            engine: script.engine,
            engine_version: script.engine_version,
            params: BTreeMap::new(),
        },
    )?;

    Ok(())
}

fn create_failure(err: ApiError) -> anyhow::Error {
    if warn_unauthenticated(&err) {
        return reported(err);
    }

    if err.is_bad_request() {
        if let Some(detail) = err.detail() {
            error!("{detail}");
        }
        info!("Run with --debug to see full error");
        return reported(err);
    }

    err.into()
}

async fn run_deploy(session: &Session) -> Result<()> {
    let deployer = Deployer::new(session.settings.api_base_url.as_str());
    match deployer.deploy(current_dir()?, &session.token_manager()).await {
        Ok(build) => {
            debug!("build {} is {}", build.id, build.status);
            Ok(())
        }
        Err(err @ (DeployError::NoConfig(_) | DeployError::Api(_))) => Err(reported(err)),
        Err(DeployError::Auth(err @ AuthError::NotLoggedIn)) => {
            error!("You're not logged in. Run `village login` to log in.");
            Err(reported(err))
        }
        Err(err) => Err(err.into()),
    }
}

async fn run_setup(session: &Session, opts: SetupOptions) -> Result<()> {
    let cwd = current_dir()?;
    if !confirm_overwrite(&cwd)? {
        return Ok(());
    }

    let client = session.client().await?;
    let script = client
        .script(&opts.id)
        .await
        .map_err(|err| api_failure(err, Some(format!("Script {} not found.", opts.id))))?;

    let params = script.latest_params();
    let script = script.script;
    Project::initialize(
        cwd,
        DeploymentConfig {
            id: script.id,
            name: script.name,
            engine: script.engine,
            engine_version: script.engine_version,
            params,
        },
    )?;

    Ok(())
}

async fn run_run(session: &Session, opts: RunOptions) -> Result<()> {
    let input = match RunScriptInput::from_pairs(opts.script_id.as_str(), &opts.params) {
        Ok(input) => input,
        Err(err) => {
            error!("{err}");
            return Err(reported(err));
        }
    };

    let client = session.client().await?;
    let run = client
        .run_script(&input)
        .await
        .map_err(|err| api_failure(err, None))?;

    info!(
        "Running script {} with build {}",
        opts.script_id,
        run.build_id.as_deref().unwrap_or("<unknown>")
    );
    if let Some(output) = run.output {
        println!("{output}");
    }

    Ok(())
}

async fn run_list(session: &Session, target: ListTarget) -> Result<()> {
    let client = session.client().await?;
    let now = Utc::now();

    let table = match target {
        ListTarget::Builds { id } => {
            let builds = client
                .builds(&id)
                .await
                .map_err(|err| api_failure(err, Some(format!("Script {id} not found."))))?;
            let mut table = table(["ID", "Status", "Created at"]);
            for build in builds {
                table.add_row([build.id, build.status, time_since(build.created_at, now)]);
            }
            table
        }
        ListTarget::Runs { id } => {
            let runs = client
                .runs(&id)
                .await
                .map_err(|err| api_failure(err, Some(format!("Script {id} not found."))))?;
            let mut table = table(["ID", "Status", "Created at"]);
            for run in runs {
                table.add_row([run.id, run.status, time_since(run.created_at, now)]);
            }
            table
        }
        ListTarget::Schedules { id } => {
            let schedules = client
                .schedules(&id)
                .await
                .map_err(|err| api_failure(err, Some(format!("Script {id} not found."))))?;
            let mut table = table(["ID", "Schedule", "Created at"]);
            for schedule in schedules {
                let cron = schedule.cron();
                table.add_row([schedule.id, cron, time_since(schedule.created_at, now)]);
            }
            table
        }
        ListTarget::Scripts { id } => {
            let scripts = client
                .scripts(&id)
                .await
                .map_err(|err| api_failure(err, Some(format!("Workspace {id} not found."))))?;
            let mut table = table(["ID", "Name", "Engine", "Created at"]);
            for script in scripts {
                table.add_row([
                    script.id,
                    script.name,
                    script.engine.to_string(),
                    time_since(script.created_at, now),
                ]);
            }
            table
        }
        ListTarget::Workspaces => {
            let workspaces = client
                .workspaces()
                .await
                .map_err(|err| api_failure(err, None))?;
            let mut table = table(["ID", "Name", "Created at"]);
            for workspace in workspaces {
                table.add_row([
                    workspace.id,
                    workspace.name,
                    time_since(workspace.created_at, now),
                ]);
            }
            table
        }
    };

    println!("{table}");

    Ok(())
}

async fn run_remove(session: &Session, opts: RemoveOptions) -> Result<()> {
    let client = session.client().await?;
    let script = client
        .delete_script(&opts.id)
        .await
        .map_err(|err| api_failure(err, Some(format!("Script {} not found.", opts.id))))?;
    info!("Removed script {}", script.id);

    Ok(())
}

async fn run_token(session: &Session) -> Result<()> {
    let tokens = session.tokens().await?;
    println!("{}", tokens.access_token);

    Ok(())
}

async fn run_userinfo(session: &Session) -> Result<()> {
    let tokens = session.tokens().await?;
    let profile = session.server().userinfo(&tokens.access_token).await?;
    println!("{}", serde_json::to_string_pretty(&profile)?);

    Ok(())
}

async fn run_workspace(session: &Session) -> Result<()> {
    let client = session.client().await?;
    let workspaces = client
        .workspaces()
        .await
        .map_err(|err| api_failure(err, None))?;
    if workspaces.is_empty() {
        error!("No workspaces found");
        return Err(reported(anyhow!("no workspaces to choose from")));
    }

    let workspace = Select::new("Choose a default workspace", workspaces).prompt()?;
    set_default(&client, &session.store, &workspace).await?;

    Ok(())
}
