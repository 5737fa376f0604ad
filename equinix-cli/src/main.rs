use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use log::debug;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

use equinix_core::config::ProviderConfig;
use equinix_core::diagnostics::{Diagnostics, Response, Severity};
use equinix_core::model::{attributes_to_json, parse_config};
use equinix_core::provider::{DataSourceHandler, Provider, ResourceHandler};
use equinix_core::resource::{Resource, ResourceId, State, Value};
use equinix_core::schema::{PlanModifier, ResourceSchema};
use equinix_provider_fabric::{FabricClient, FabricProvider};
use equinix_provider_metal::{MetalClient, MetalProvider};

#[derive(Parser)]
#[command(name = "equinix")]
#[command(about = "Manage single Equinix Fabric and Metal resources", long_about = None)]
struct Cli {
    /// Provider configuration file (TOML); EQUINIX_* variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log requests and polling at debug level
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List resource and data source types, or describe one
    Schema {
        /// Type name (e.g. equinix_fabric_stream)
        type_name: Option<String>,
    },
    /// Validate a configuration file against a resource schema
    Validate {
        type_name: String,
        /// JSON object keyed by attribute name
        file: PathBuf,
    },
    /// Create a resource and write its state
    Create {
        type_name: String,
        file: PathBuf,
        /// Where to write the resulting state
        #[arg(long, default_value = "state.json")]
        state: PathBuf,
        /// Local name of the resource
        #[arg(long, default_value = "main")]
        name: String,
    },
    /// Refresh a resource from its state file
    Read {
        type_name: String,
        #[arg(long, default_value = "state.json")]
        state: PathBuf,
    },
    /// Import an existing resource by identifier
    Import {
        type_name: String,
        /// Import identifier (e.g. `<stream_id>/<subscription_id>`)
        id: String,
        #[arg(long, default_value = "state.json")]
        state: PathBuf,
        #[arg(long, default_value = "main")]
        name: String,
    },
    /// Apply a changed configuration to an existing resource
    Update {
        type_name: String,
        file: PathBuf,
        #[arg(long, default_value = "state.json")]
        state: PathBuf,
    },
    /// Delete the resource recorded in a state file
    Delete {
        type_name: String,
        #[arg(long, default_value = "state.json")]
        state: PathBuf,
    },
    /// Query a data source
    Data {
        type_name: String,
        file: PathBuf,
    },
    /// Generate shell completions
    Completions { shell: Shell },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = ProviderConfig::load(cli.config.as_deref()).context("loading provider configuration")?;
    match cli.command {
        Commands::Schema { type_name } => run_schema(&config, type_name.as_deref()),
        Commands::Validate { type_name, file } => run_validate(&config, &type_name, &file),
        Commands::Create {
            type_name,
            file,
            state,
            name,
        } => run_create(&config, &type_name, &file, &state, &name).await,
        Commands::Read { type_name, state } => run_read(&config, &type_name, &state).await,
        Commands::Import {
            type_name,
            id,
            state,
            name,
        } => run_import(&config, &type_name, &id, &state, &name).await,
        Commands::Update {
            type_name,
            file,
            state,
        } => run_update(&config, &type_name, &file, &state).await,
        Commands::Delete { type_name, state } => run_delete(&config, &type_name, &state).await,
        Commands::Data { type_name, file } => run_data(&config, &type_name, &file).await,
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "equinix", &mut io::stdout());
            Ok(())
        }
    }
}

// =============================================================================
// Providers
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Surface {
    Fabric,
    Metal,
}

fn surface(type_name: &str) -> Result<Surface> {
    if type_name.starts_with("equinix_fabric_") {
        Ok(Surface::Fabric)
    } else if type_name.starts_with("equinix_metal_") {
        Ok(Surface::Metal)
    } else {
        bail!("unknown type '{}': expected an equinix_fabric_* or equinix_metal_* type", type_name)
    }
}

/// Authenticated provider for the surface `type_name` belongs to
async fn connect(config: &ProviderConfig, type_name: &str) -> Result<Box<dyn Provider>> {
    let provider: Box<dyn Provider> = match surface(type_name)? {
        Surface::Fabric => Box::new(
            FabricProvider::connect(config)
                .await
                .context("connecting to Equinix Fabric")?,
        ) as Box<dyn Provider>,
        Surface::Metal => Box::new(
            MetalProvider::from_config(config).context("connecting to Equinix Metal")?,
        ),
    };
    Ok(provider)
}

/// Providers that are never called, for schema inspection without credentials
fn offline_providers(config: &ProviderConfig) -> Result<Vec<Box<dyn Provider>>> {
    let endpoint = config.endpoint()?;
    let token = || SecretString::from(String::new());
    let fabric = FabricClient::with_token(endpoint.as_str(), token(), config.timeout())?;
    let metal = MetalClient::with_token(endpoint.as_str(), token(), config.timeout())?;
    let providers: Vec<Box<dyn Provider>> = vec![
        Box::new(FabricProvider::new(Arc::new(fabric))) as Box<dyn Provider>,
        Box::new(MetalProvider::new(Arc::new(metal))),
    ];
    Ok(providers)
}

fn offline_resource(config: &ProviderConfig, type_name: &str) -> Result<Arc<dyn ResourceHandler>> {
    offline_providers(config)?
        .iter()
        .find_map(|p| p.resource(type_name))
        .ok_or_else(|| anyhow!("unknown resource type '{}'", type_name))
}

async fn resource_handler(config: &ProviderConfig, type_name: &str) -> Result<Arc<dyn ResourceHandler>> {
    connect(config, type_name)
        .await?
        .resource(type_name)
        .ok_or_else(|| anyhow!("unknown resource type '{}'", type_name))
}

// =============================================================================
// State file
// =============================================================================

/// One resource's state as written by create/import and read back by the
/// other commands
#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct StateFile {
    resource_type: String,
    name: String,
    identifier: Option<String>,
    attributes: serde_json::Value,
}

impl StateFile {
    fn from_state(state: &State) -> Self {
        Self {
            resource_type: state.id.resource_type.clone(),
            name: state.id.name.clone(),
            identifier: state.identifier.clone(),
            attributes: attributes_to_json(&state.attributes),
        }
    }

    fn into_state(self, schema: &ResourceSchema) -> State {
        let attributes = parse_config(schema, &self.attributes);
        let state = State::existing(ResourceId::new(self.resource_type, self.name), attributes);
        match self.identifier {
            Some(identifier) => state.with_identifier(identifier),
            None => state,
        }
    }
}

fn load_state(path: &Path, schema: &ResourceSchema) -> Result<State> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let file: StateFile =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if file.resource_type != schema.resource_type {
        bail!(
            "{} holds a {} resource, not {}",
            path.display(),
            file.resource_type,
            schema.resource_type
        );
    }
    Ok(file.into_state(schema))
}

fn save_state(path: &Path, state: &State) -> Result<()> {
    let text = serde_json::to_string_pretty(&StateFile::from_state(state))?;
    fs::write(path, text + "\n").with_context(|| format!("writing {}", path.display()))?;
    debug!("wrote state to {}", path.display());
    Ok(())
}

fn load_config(path: &Path, schema: &ResourceSchema) -> Result<HashMap<String, Value>> {
    let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let json: serde_json::Value =
        serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?;
    if !json.is_object() {
        bail!("{} must contain a JSON object", path.display());
    }
    Ok(parse_config(schema, &json))
}

// =============================================================================
// Output
// =============================================================================

fn print_diagnostics(diagnostics: &Diagnostics) {
    for diag in diagnostics.iter() {
        let label = match diag.severity {
            Severity::Error => "Error:".red().bold(),
            Severity::Warning => "Warning:".yellow().bold(),
        };
        if diag.detail.is_empty() {
            eprintln!("{} {}", label, diag.summary);
        } else {
            eprintln!("{} {}\n  {}", label, diag.summary, diag.detail);
        }
    }
}

/// Print diagnostics and unwrap the value, failing on any error
fn finish<T>(response: Response<T>, what: &str) -> Result<T> {
    print_diagnostics(&response.diagnostics);
    response
        .into_result()
        .map_err(|diags| anyhow!("{} failed with {} error(s)", what, diags.errors().count()))
}

/// Attribute values with sensitive ones masked
fn display_attributes(schema: &ResourceSchema, attributes: &HashMap<String, Value>) -> serde_json::Value {
    let mut shown = attributes.clone();
    for (name, attr) in &schema.attributes {
        if attr.sensitive
            && let Some(value) = shown.get_mut(name)
            && !value.is_null()
        {
            *value = Value::string("(sensitive)");
        }
    }
    attributes_to_json(&shown)
}

fn print_state(schema: &ResourceSchema, state: &State) -> Result<()> {
    let json = display_attributes(schema, &state.attributes);
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

fn format_value(value: &Value) -> String {
    match value {
        Value::Null => "(null)".dimmed().to_string(),
        other => equinix_core::model::value_to_json(other).to_string(),
    }
}

// =============================================================================
// Commands
// =============================================================================

fn run_schema(config: &ProviderConfig, type_name: Option<&str>) -> Result<()> {
    let providers = offline_providers(config)?;
    let Some(type_name) = type_name else {
        for provider in &providers {
            println!("{}", provider.name().cyan().bold());
            for r in provider.resources() {
                println!("  {} {}", "resource".green(), r.type_name());
            }
            for d in provider.data_sources() {
                println!("  {} {}", "data".blue(), d.type_name());
            }
        }
        return Ok(());
    };

    let schemas: Vec<ResourceSchema> = providers
        .iter()
        .flat_map(|p| {
            p.resource(type_name)
                .map(|r| r.schema())
                .into_iter()
                .chain(p.data_source(type_name).map(|d| d.schema()))
        })
        .collect();
    if schemas.is_empty() {
        bail!("unknown type '{}'", type_name);
    }
    for schema in schemas {
        print_schema(&schema);
    }
    Ok(())
}

fn print_schema(schema: &ResourceSchema) {
    println!("{}", schema.resource_type.cyan().bold());
    if let Some(description) = &schema.description {
        println!("  {}", description.dimmed());
    }
    for name in schema.attribute_names() {
        let attr = &schema.attributes[name];
        let mut flags = Vec::new();
        if attr.required {
            flags.push("required");
        }
        if attr.optional {
            flags.push("optional");
        }
        if attr.computed {
            flags.push("computed");
        }
        if attr.sensitive {
            flags.push("sensitive");
        }
        if attr.has_modifier(PlanModifier::RequiresReplace) {
            flags.push("forces replacement");
        }
        println!(
            "  {} {} [{}]",
            name.bold(),
            attr.attr_type.to_string().yellow(),
            flags.join(", ")
        );
        if let Some(description) = &attr.description {
            println!("      {}", description);
        }
    }
}

fn run_validate(config: &ProviderConfig, type_name: &str, file: &Path) -> Result<()> {
    let handler = offline_resource(config, type_name)?;
    let schema = handler.schema();
    let resource = Resource {
        id: ResourceId::new(type_name, "main"),
        attributes: load_config(file, &schema)?,
        read_only: false,
    };
    let diags = handler.validate(&resource);
    print_diagnostics(&diags);
    if diags.has_error() {
        bail!("{} is not a valid {} configuration", file.display(), type_name);
    }
    println!("{}", "Configuration is valid.".green());
    Ok(())
}

async fn run_create(
    config: &ProviderConfig,
    type_name: &str,
    file: &Path,
    state_path: &Path,
    name: &str,
) -> Result<()> {
    let handler = resource_handler(config, type_name).await?;
    let schema = handler.schema();
    let configured = load_config(file, &schema)?;
    let resource = Resource {
        id: ResourceId::new(type_name, name),
        attributes: configured,
        read_only: false,
    };
    let diags = handler.validate(&resource);
    if diags.has_error() {
        print_diagnostics(&diags);
        bail!("{} is not a valid {} configuration", file.display(), type_name);
    }

    let planned = schema.plan(None, &resource.attributes);
    let plan = Resource {
        attributes: planned.attributes,
        ..resource
    };
    println!("{} {}.{}", "+".green().bold(), type_name, name);
    let state = finish(handler.create(&plan).await, "create")?;
    save_state(state_path, &state)?;
    print_state(&schema, &state)
}

async fn run_read(config: &ProviderConfig, type_name: &str, state_path: &Path) -> Result<()> {
    let handler = resource_handler(config, type_name).await?;
    let schema = handler.schema();
    let current = load_state(state_path, &schema)?;
    let state = finish(handler.read(&current).await, "read")?;
    if !state.exists {
        fs::remove_file(state_path).with_context(|| format!("removing {}", state_path.display()))?;
        println!("{}", "Resource no longer exists; state removed.".yellow());
        return Ok(());
    }
    save_state(state_path, &state)?;
    print_state(&schema, &state)
}

async fn run_import(
    config: &ProviderConfig,
    type_name: &str,
    import_id: &str,
    state_path: &Path,
    name: &str,
) -> Result<()> {
    let handler = resource_handler(config, type_name).await?;
    let schema = handler.schema();
    let imported = finish(
        handler.import_state(ResourceId::new(type_name, name), import_id),
        "import",
    )?;
    let state = finish(handler.read(&imported).await, "read")?;
    if !state.exists {
        bail!("{} {} does not exist", type_name, import_id);
    }
    save_state(state_path, &state)?;
    print_state(&schema, &state)
}

async fn run_update(
    config: &ProviderConfig,
    type_name: &str,
    file: &Path,
    state_path: &Path,
) -> Result<()> {
    let handler = resource_handler(config, type_name).await?;
    let schema = handler.schema();
    let prior = load_state(state_path, &schema)?;
    let configured = load_config(file, &schema)?;
    let resource = Resource {
        id: prior.id.clone(),
        attributes: configured,
        read_only: false,
    };
    let diags = handler.validate(&resource);
    if diags.has_error() {
        print_diagnostics(&diags);
        bail!("{} is not a valid {} configuration", file.display(), type_name);
    }

    let planned = schema.plan(Some(&prior), &resource.attributes);
    if !planned.requires_replace.is_empty() {
        bail!(
            "changing {} requires replacing {}.{}; delete and create it instead",
            planned.requires_replace.join(", "),
            prior.id.resource_type,
            prior.id.name
        );
    }
    if planned.changed.is_empty() {
        println!("{}", "No changes. Resource is up-to-date.".green());
        return Ok(());
    }

    println!("{} {}.{}", "~".yellow().bold(), prior.id.resource_type, prior.id.name);
    for name in &planned.changed {
        let sensitive = schema.attributes.get(name).is_some_and(|a| a.sensitive);
        let (from, to) = if sensitive {
            ("(sensitive)".to_string(), "(sensitive)".to_string())
        } else {
            (
                format_value(prior.get(name)),
                format_value(planned.attributes.get(name).unwrap_or(&Value::Null)),
            )
        };
        println!("    {}: {} → {}", name, from.red(), to.green());
    }

    let plan = Resource {
        attributes: planned.attributes,
        ..resource
    };
    let state = finish(handler.update(&prior, &plan).await, "update")?;
    save_state(state_path, &state)?;
    print_state(&schema, &state)
}

async fn run_delete(config: &ProviderConfig, type_name: &str, state_path: &Path) -> Result<()> {
    let handler = resource_handler(config, type_name).await?;
    let schema = handler.schema();
    let current = load_state(state_path, &schema)?;
    println!("{} {}.{}", "-".red().bold(), current.id.resource_type, current.id.name);
    finish(handler.delete(&current).await, "delete")?;
    fs::remove_file(state_path).with_context(|| format!("removing {}", state_path.display()))?;
    println!("{}", "Deleted.".green());
    Ok(())
}

async fn run_data(config: &ProviderConfig, type_name: &str, file: &Path) -> Result<()> {
    let provider = connect(config, type_name).await?;
    let handler: Arc<dyn DataSourceHandler> = provider
        .data_source(type_name)
        .ok_or_else(|| anyhow!("unknown data source '{}'", type_name))?;
    let schema = handler.schema();
    let config = Resource {
        id: ResourceId::new(type_name, "main"),
        attributes: load_config(file, &schema)?,
        read_only: true,
    };
    let diags = handler.validate(&config);
    if diags.has_error() {
        print_diagnostics(&diags);
        bail!("{} is not a valid {} configuration", file.display(), type_name);
    }
    let state = finish(handler.read(&config).await, "read")?;
    print_state(&schema, &state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use equinix_core::schema::{AttributeSchema, AttributeType};
    use tempfile::tempdir;

    fn schema() -> ResourceSchema {
        ResourceSchema::new("equinix_fabric_stream_subscription")
            .attribute(AttributeSchema::new("name", AttributeType::String).required())
            .attribute(AttributeSchema::new("stream_id", AttributeType::String).local())
            .attribute(AttributeSchema::new("password", AttributeType::String).sensitive())
    }

    fn state() -> State {
        let mut attributes = HashMap::new();
        attributes.insert("name".to_string(), Value::string("alerts"));
        attributes.insert("stream_id".to_string(), Value::string("s-1"));
        attributes.insert("password".to_string(), Value::string("hunter2"));
        State::existing(
            ResourceId::new("equinix_fabric_stream_subscription", "main"),
            attributes,
        )
        .with_identifier("sub-1")
    }

    #[test]
    fn state_file_keeps_local_attributes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &state()).unwrap();

        let loaded = load_state(&path, &schema()).unwrap();
        assert_eq!(loaded, state());
    }

    #[test]
    fn state_file_for_another_type_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state(&path, &state()).unwrap();

        let other = ResourceSchema::new("equinix_fabric_stream");
        let err = load_state(&path, &other).unwrap_err();
        assert!(err.to_string().contains("not equinix_fabric_stream"));
    }

    #[test]
    fn sensitive_values_are_masked() {
        let shown = display_attributes(&schema(), &state().attributes);
        assert_eq!(shown["password"], "(sensitive)");
        assert_eq!(shown["name"], "alerts");
    }

    #[test]
    fn config_must_be_an_object() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(load_config(&path, &schema()).is_err());
    }

    #[test]
    fn types_route_to_their_surface() {
        assert_eq!(surface("equinix_fabric_metro").unwrap(), Surface::Fabric);
        assert_eq!(surface("equinix_metal_organization").unwrap(), Surface::Metal);
        assert!(surface("aws_vpc").is_err());
    }

    #[test]
    fn offline_schema_lookup_needs_no_credentials() {
        let handler = offline_resource(&ProviderConfig::default(), "equinix_fabric_stream").unwrap();
        assert_eq!(handler.type_name(), "equinix_fabric_stream");
        assert!(offline_resource(&ProviderConfig::default(), "equinix_fabric_metro").is_err());
    }
}
