use clap::{Parser, Subcommand};
use comfy_table::{Cell, Table, presets::UTF8_FULL};
use indexmap::IndexSet;
use sqlmapper::backend::{SqliteConnection, SqliteTransaction};
use sqlmapper::{CommandKind, MappingUnit, RegistryBuilder, RowBounds, Session, Settings, StatementRegistry, Value};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sqlmapper")]
#[command(about = "Load SQL mapping units and run their statements against SQLite", long_about = None)]
struct Cli {
    /// Settings file (default: ./sqlmapper.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite database file (default: in memory)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    /// Active database variant
    #[arg(long, global = true)]
    database_id: Option<String>,

    /// Mapping unit to load, in addition to the configured ones
    #[arg(short, long = "mapper", global = true)]
    mappers: Vec<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load every mapping unit and list the registered statements
    Check,
    /// Run a raw SQL script and commit it
    Script {
        file: PathBuf,
    },
    /// Execute one mapped statement
    Run {
        /// Full or short statement id
        statement: String,

        /// Parameter object as JSON
        #[arg(short, long)]
        param: Option<String>,

        /// SQL script run first (useful with an in-memory database)
        #[arg(long)]
        init: Option<PathBuf>,

        #[arg(long, default_value_t = RowBounds::NO_ROW_OFFSET)]
        offset: usize,

        #[arg(long)]
        limit: Option<usize>,
    },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sqlmapper=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Settings from file and environment, with CLI flags on top.
fn load_settings(cli: &Cli) -> sqlmapper::Result<Settings> {
    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(database) = &cli.database {
        settings.database = Some(database.clone());
    }
    if let Some(database_id) = &cli.database_id {
        settings.database_id = Some(database_id.clone());
    }
    settings.mapper_locations.extend(cli.mappers.iter().cloned());
    Ok(settings)
}

fn build_registry(settings: Settings) -> sqlmapper::Result<Arc<StatementRegistry>> {
    let locations = settings.mapper_locations.clone();
    let mut builder = RegistryBuilder::new(settings);
    for path in &locations {
        builder.add_unit(&MappingUnit::from_path(path)?);
    }
    builder.build()
}

fn open_session(registry: &Arc<StatementRegistry>) -> sqlmapper::Result<Session> {
    let connection = SqliteConnection::open_optional(registry.settings().database.as_deref())?;
    let mut transaction = SqliteTransaction::new(connection, false);
    if let Some(timeout) = registry.settings().default_statement_timeout {
        transaction = transaction.with_timeout(timeout);
    }
    Ok(Session::new(Arc::clone(registry), Box::new(transaction)))
}

/// Objects become one column per key (union, first-seen order); anything else a single `value` column.
fn render_values(values: &[Value]) -> String {
    if values.is_empty() {
        return "(0 rows)\n".to_string();
    }
    let mut columns: IndexSet<&str> = IndexSet::new();
    for value in values {
        match value.as_object() {
            Some(record) => columns.extend(record.keys().map(String::as_str)),
            None => {
                columns.insert("value");
            }
        }
    }

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(columns.iter().map(|c| Cell::new(c)));
    for value in values {
        let row = columns.iter().map(|column| match value.as_object() {
            Some(record) => record.get(*column).map_or_else(String::new, ToString::to_string),
            None if *column == "value" => value.to_string(),
            None => String::new(),
        });
        table.add_row(row.map(Cell::new));
    }
    format!("{table}\n({} rows)\n", values.len())
}

fn check(registry: &StatementRegistry) -> sqlmapper::Result<()> {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["statement", "kind", "result shapes", "cache"]);
    for id in registry.statement_ids() {
        let statement = registry.statement(id)?;
        let shapes = statement
            .result_shapes
            .iter()
            .map(|shape| shape.id.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        table.add_row(vec![
            Cell::new(id),
            Cell::new(format!("{:?}", statement.kind)),
            Cell::new(shapes),
            Cell::new(statement.cache_namespace.as_deref().unwrap_or("-")),
        ]);
    }
    println!("{table}");
    println!("({} statements)", registry.statement_ids().len());
    Ok(())
}

fn run(
    session: &mut Session,
    statement: &str,
    param: Option<&str>,
    bounds: RowBounds,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut parameter = match param {
        Some(json) => Value::from(serde_json::from_str::<serde_json::Value>(json)?),
        None => Value::Null,
    };
    let kind = session.registry().statement(statement)?.kind;
    match kind {
        CommandKind::Select => {
            let values = session.select_list(statement, &parameter, bounds)?;
            print!("{}", render_values(&values));
        }
        CommandKind::Flush => {
            session.flush_statements()?;
        }
        CommandKind::Insert | CommandKind::Update | CommandKind::Delete => {
            let count = session.update(statement, &mut parameter)?;
            session.commit()?;
            println!("{count} row(s) affected");
            if !parameter.is_null() {
                println!("parameter: {parameter}");
            }
        }
    }
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    let registry = build_registry(settings)?;

    match &cli.command {
        Commands::Check => check(&registry)?,
        Commands::Script { file } => {
            let sql = std::fs::read_to_string(file)?;
            let mut session = open_session(&registry)?;
            session.execute_script(&sql)?;
            session.commit()?;
            println!("script applied: {}", file.display());
        }
        Commands::Run {
            statement,
            param,
            init,
            offset,
            limit,
        } => {
            let mut session = open_session(&registry)?;
            if let Some(init) = init {
                session.execute_script(&std::fs::read_to_string(init)?)?;
            }
            let bounds = RowBounds::new(*offset, limit.unwrap_or(RowBounds::NO_ROW_LIMIT));
            run(&mut session, statement, param.as_deref(), bounds)?;
        }
    }

    Ok(())
}
