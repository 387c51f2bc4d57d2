use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use specquery::ast::check_sql;
use specquery::catalog::{built_in_variants, find_variant, QueryVariant, VariantRequest};
use specquery::config::AppConfig;
use specquery::db::{create_pool, Dataset, MemoryEngine, PgEngine, StorageEngine};
use specquery::explain::{format_duration_ms, render, report};
use specquery::export::{render_output, ExportFormat};
use specquery::service::{RoleSearch, UserQueryService, UserSearch};

/// Composable query specifications over users, roles and permissions
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List the built-in query variants
    List,
    /// Print the SQL a variant generates
    Sql {
        variant: String,
        /// Pretty-print the statements
        #[arg(long)]
        pretty: bool,
        /// Re-parse the generated SQL with a PostgreSQL parser
        #[arg(long)]
        check: bool,
        #[command(flatten)]
        filters: FilterArgs,
    },
    /// Run a variant against a dataset file or a database
    Run {
        variant: String,
        /// JSON dataset for the in-memory engine
        #[arg(long, conflicts_with = "connect")]
        dataset: Option<PathBuf>,
        /// Use the database from the config file
        #[arg(long)]
        connect: bool,
        #[arg(long, value_enum, default_value_t = ExportFormat::Table)]
        format: ExportFormat,
        #[command(flatten)]
        filters: FilterArgs,
    },
}

#[derive(Args, Default)]
struct FilterArgs {
    #[arg(long)]
    username: Option<String>,
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    role: Option<String>,
    #[arg(long)]
    permission: Option<String>,
    /// Zero-based page number
    #[arg(long)]
    page: Option<u32>,
    #[arg(long)]
    size: Option<u32>,
}

impl FilterArgs {
    fn request(&self, config: &AppConfig, variant: &QueryVariant) -> VariantRequest {
        VariantRequest {
            users: UserSearch {
                username: self.username.clone(),
                email: self.email.clone(),
            },
            roles: RoleSearch {
                role: self.role.clone(),
                permission: self.permission.clone(),
            },
            page: self.page,
            size: Some(
                config
                    .paging
                    .size(self.size.or(Some(variant.default_size))),
            ),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_default()?,
    };

    match cli.command {
        Command::List => {
            for variant in built_in_variants() {
                println!(
                    "{:<30} {:<8} {:<9} {}",
                    variant.name,
                    variant.route,
                    if variant.optimized { "optimized" } else { "" },
                    variant.description
                );
            }
        }
        Command::Sql {
            variant,
            pretty,
            check,
            filters,
        } => {
            let variant = find_variant(&variant)?;
            let schema = config.schema()?;
            let request = filters.request(&config, &variant);
            let report = report(&variant, &schema, &request);
            print!("{}", render(&report, pretty));
            if check {
                for statement in &report.statements {
                    check_sql(&statement.sql)
                        .with_context(|| format!("Generated {} statement is invalid", statement.label))?;
                }
                println!("SQL OK ({} statements)", report.statements.len());
            }
        }
        Command::Run {
            variant,
            dataset,
            connect,
            format,
            filters,
        } => {
            let variant = find_variant(&variant)?;
            let schema = config.schema()?;
            let request = filters.request(&config, &variant);

            if connect {
                let mut db = config.database.clone();
                // Resolve password: PGPASSWORD env var, then interactive prompt
                if db.password.is_empty() {
                    if let Ok(pw) = std::env::var("PGPASSWORD") {
                        db.password = pw;
                    } else {
                        let prompt = format!("Password for {}: ", db.display_string());
                        db.password = rpassword::read_password_from_tty(Some(&prompt))?;
                    }
                }
                let engine = PgEngine::new(create_pool(&db)?);
                run(&variant, UserQueryService::new(schema, engine), &request, format).await?;
            } else {
                let dataset = match dataset {
                    Some(path) => Dataset::load(&path)?,
                    None => anyhow::bail!("`run` needs --dataset <file.json> or --connect"),
                };
                let engine = MemoryEngine::new(dataset);
                run(&variant, UserQueryService::new(schema, engine), &request, format).await?;
            }
        }
    }

    Ok(())
}

async fn run<E: StorageEngine>(
    variant: &QueryVariant,
    service: UserQueryService<E>,
    request: &VariantRequest,
    format: ExportFormat,
) -> Result<()> {
    let start = std::time::Instant::now();
    let output = variant.run(&service, request).await?;
    print!("{}", render_output(&output, format)?);
    if format == ExportFormat::Table {
        println!(
            "{} in {}",
            variant.name,
            format_duration_ms(start.elapsed().as_secs_f64() * 1000.0)
        );
    }
    Ok(())
}
