use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde_json::Value;
use storage_finder_core::{
    Catalog, ChoiceId, FacetId, NonMatchingPolicy, SelectionEvent, SelectionState, ServiceId,
    Session,
};
use tracing_subscriber::EnvFilter;

const CLI_CONTRACT_VERSION: &str = "sf.v1";
const FACET_TREE_FILE: &str = "facet-tree.json";
const SERVICE_LIST_FILE: &str = "service-list.json";
const LOG_ENV_VAR: &str = "SF_LOG";
const DEFAULT_LOG_FILTER: &str = "warn";

#[derive(Debug, Parser)]
#[command(name = "sf")]
#[command(about = "Storage Finder CLI")]
struct Cli {
    /// Directory holding facet-tree.json and service-list.json.
    #[arg(long, default_value = "./data/storage-finder")]
    catalog_dir: PathBuf,

    #[arg(long)]
    facets: Option<PathBuf>,

    #[arg(long)]
    services: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Catalog {
        #[command(subcommand)]
        command: CatalogCommand,
    },
    Filter(FilterArgs),
    View(ViewArgs),
    Replay(ReplayArgs),
}

#[derive(Debug, Subcommand)]
enum CatalogCommand {
    Summary,
    Attributes,
}

#[derive(Debug, Args)]
struct FilterArgs {
    /// Facet answer as FACET=CHOICE; repeat for more answers.
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<Answer>,
}

#[derive(Debug, Args)]
struct ViewArgs {
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,
    #[arg(long = "answer", value_parser = parse_answer)]
    answers: Vec<Answer>,
    #[arg(long = "select")]
    selections: Vec<String>,
    #[arg(long, default_value_t = false)]
    select_all: bool,
}

#[derive(Debug, Args)]
struct ReplayArgs {
    /// JSON array of selection events.
    #[arg(long)]
    events: PathBuf,
    /// Emit the view after every event, not only the final one.
    #[arg(long, default_value_t = false)]
    trace: bool,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PolicyArg {
    ShowDisabled,
    ShowEnabled,
    Hide,
}

impl PolicyArg {
    fn into_policy(self) -> NonMatchingPolicy {
        match self {
            Self::ShowDisabled => NonMatchingPolicy::ShowDisabled,
            Self::ShowEnabled => NonMatchingPolicy::ShowEnabled,
            Self::Hide => NonMatchingPolicy::Hide,
        }
    }
}

#[derive(Debug, Clone)]
struct Answer {
    facet_id: FacetId,
    choice_id: ChoiceId,
}

impl Answer {
    fn into_event(self) -> SelectionEvent {
        SelectionEvent::ToggleFacetChoice {
            facet_id: self.facet_id,
            choice_id: self.choice_id,
            checked: true,
        }
    }
}

fn parse_answer(raw: &str) -> Result<Answer, String> {
    let Some((facet, choice)) = raw.split_once('=') else {
        return Err(format!("expected FACET=CHOICE, got `{raw}`"));
    };
    let (facet, choice) = (facet.trim(), choice.trim());
    if facet.is_empty() || choice.is_empty() {
        return Err(format!("facet and choice must be non-empty in `{raw}`"));
    }
    Ok(Answer { facet_id: facet.into(), choice_id: choice.into() })
}

fn with_contract_version(value: Value) -> Value {
    match value {
        Value::Object(mut object) => {
            object.insert(
                "contract_version".to_string(),
                Value::String(CLI_CONTRACT_VERSION.to_string()),
            );
            Value::Object(object)
        }
        other => serde_json::json!({
            "contract_version": CLI_CONTRACT_VERSION,
            "payload": other
        }),
    }
}

fn emit_json(value: Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&with_contract_version(value))?);
    Ok(())
}

fn init_tracing() {
    let filter =
        EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let catalog = load_catalog(&cli)?;
    match cli.command {
        Command::Catalog { command } => run_catalog(&command, &catalog),
        Command::Filter(args) => run_filter(args, &catalog),
        Command::View(args) => run_view(args, catalog),
        Command::Replay(args) => run_replay(&args, catalog),
    }
}

fn load_catalog(cli: &Cli) -> Result<Catalog> {
    let facets_path = cli.facets.clone().unwrap_or_else(|| cli.catalog_dir.join(FACET_TREE_FILE));
    let services_path =
        cli.services.clone().unwrap_or_else(|| cli.catalog_dir.join(SERVICE_LIST_FILE));

    let facet_tree = read_document(&facets_path)?;
    let service_list = read_document(&services_path)?;
    let catalog = Catalog::from_json(&facet_tree, &service_list).with_context(|| {
        format!(
            "failed to load catalog from {} and {}",
            facets_path.display(),
            services_path.display()
        )
    })?;

    tracing::info!(
        facets = catalog.facets().len(),
        services = catalog.services().len(),
        attributes = catalog.attribute_index().len(),
        "catalog loaded"
    );
    Ok(catalog)
}

fn read_document(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))
}

fn run_catalog(command: &CatalogCommand, catalog: &Catalog) -> Result<()> {
    match command {
        CatalogCommand::Summary => emit_json(serde_json::json!({
            "total_facets": catalog.facets().len(),
            "total_services": catalog.services().len(),
            "total_attributes": catalog.attribute_index().len(),
            "facets": catalog.facets().iter().map(|facet| serde_json::json!({
                "id": facet.id,
                "name": facet.name,
                "control_type": facet.control_type,
                "choices": facet.choices.iter().map(|choice| &choice.id).collect::<Vec<_>>(),
            })).collect::<Vec<_>>(),
            "services": catalog.services().iter().map(|service| serde_json::json!({
                "id": service.id,
                "title": service.title,
            })).collect::<Vec<_>>(),
        })),
        CatalogCommand::Attributes => emit_json(serde_json::json!({
            "attributes": serde_json::to_value(catalog.attribute_index())
                .context("failed to serialize attribute index")?,
        })),
    }
}

fn run_filter(args: FilterArgs, catalog: &Catalog) -> Result<()> {
    let events = args.answers.into_iter().map(Answer::into_event).collect::<Vec<_>>();
    warn_unknown_answers(catalog, &events);
    let state = events
        .iter()
        .fold(SelectionState::new(), |state, event| state.apply(catalog, event));
    let filtered = state.filtered(catalog);

    emit_json(serde_json::json!({
        "answers": serde_json::to_value(state.facet_selections())
            .context("failed to serialize facet selections")?,
        "total_services": catalog.services().len(),
        "available_services": filtered.len(),
        "services": filtered.iter().map(|service| serde_json::json!({
            "id": service.id,
            "title": service.title,
        })).collect::<Vec<_>>(),
    }))
}

fn run_view(args: ViewArgs, catalog: Catalog) -> Result<()> {
    let mut events = Vec::new();
    if let Some(policy) = args.policy {
        events.push(SelectionEvent::SetPolicy { policy: policy.into_policy() });
    }
    events.extend(args.answers.into_iter().map(Answer::into_event));
    for raw in args.selections {
        let service_id = ServiceId::from(raw);
        if catalog.service(&service_id).is_none() {
            tracing::warn!(%service_id, "selected service is not in the catalog");
        }
        events.push(SelectionEvent::ToggleService { service_id });
    }
    if args.select_all {
        events.push(SelectionEvent::SelectAllVisible);
    }
    warn_unknown_answers(&catalog, &events);

    let mut session = Session::new(catalog);
    let view = session.apply_all(&events);
    emit_json(serde_json::to_value(view).context("failed to serialize view")?)
}

fn run_replay(args: &ReplayArgs, catalog: Catalog) -> Result<()> {
    let body = read_document(&args.events)?;
    let events = serde_json::from_str::<Vec<SelectionEvent>>(&body)
        .with_context(|| format!("invalid event list in {}", args.events.display()))?;
    warn_unknown_answers(&catalog, &events);

    let mut session = Session::new(catalog);
    let mut steps = Vec::new();
    for event in &events {
        let view = session.apply(event);
        if args.trace {
            steps.push(serde_json::json!({
                "event": event,
                "view": serde_json::to_value(view).context("failed to serialize view")?,
            }));
        }
    }
    tracing::info!(events = events.len(), "replay finished");

    let mut output = serde_json::json!({
        "events_applied": events.len(),
        "view": serde_json::to_value(session.view()).context("failed to serialize view")?,
    });
    if args.trace {
        let Value::Object(object) = &mut output else {
            return Err(anyhow!("replay output must be a JSON object"));
        };
        object.insert("steps".to_string(), Value::Array(steps));
    }
    emit_json(output)
}

fn warn_unknown_answers(catalog: &Catalog, events: &[SelectionEvent]) {
    for event in events {
        if let SelectionEvent::ToggleFacetChoice { facet_id, choice_id, .. } = event {
            let known =
                catalog.facet(facet_id).is_some_and(|facet| facet.choice(choice_id).is_some());
            if !known {
                tracing::warn!(%facet_id, %choice_id, "answer does not exist in the facet tree");
            }
        }
    }
}
