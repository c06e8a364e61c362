use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use unicode_width::UnicodeWidthStr;

use pgshim::catalog::TableName;
use pgshim::db::{ConnectionStore, SavedConnection};
use pgshim::filter::FilterAction;
use pgshim::{establish_connection, BackendRegistry};

/// Inspect and exercise PostgreSQL dialect profiles
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Extra profiles file (defaults to the user config directory)
    #[arg(long, global = true)]
    profiles: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// List backends, or the capability table of one backend
    Capabilities {
        #[arg(long)]
        backend: Option<String>,
    },
    /// Normalize connection settings the way a connect would
    Params {
        #[arg(long, default_value = "postgresql")]
        backend: String,
        /// Start from a saved connection
        #[arg(long)]
        connect: Option<String>,
        /// Settings as KEY=VALUE
        settings: Vec<String>,
    },
    /// Print the catalog SQL a backend would run
    Sql {
        #[arg(long, default_value = "postgresql")]
        backend: String,
        #[command(subcommand)]
        query: SqlQuery,
    },
    /// Show what the statement filter does with a statement
    Filter {
        #[arg(long, default_value = "postgresql")]
        backend: String,
        /// Purpose tag, e.g. SCHEMA
        #[arg(long)]
        purpose: Option<String>,
        sql: String,
    },
    /// Connect with a saved connection and introspect a schema or table
    Introspect {
        #[arg(long)]
        connect: String,
        /// Table to describe; lists the schema's tables when omitted
        table: Option<String>,
        #[arg(long, default_value = "public")]
        schema: String,
    },
}

#[derive(Subcommand)]
enum SqlQuery {
    Columns { table: String },
    PrimaryKeys { table: String },
    Types {
        /// Restrict discovery to these OIDs
        #[arg(long = "oid")]
        oids: Vec<u32>,
    },
    Tables {
        #[arg(default_value = "public")]
        schema: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    let mut registry = BackendRegistry::default();
    let profiles_path = cli.profiles.clone().unwrap_or_else(BackendRegistry::default_path);
    registry
        .load_file(&profiles_path)
        .with_context(|| format!("loading {}", profiles_path.display()))?;

    match cli.command {
        Command::Capabilities { backend: None } => {
            let rows = registry
                .names()
                .into_iter()
                .map(|name| {
                    let profile = registry.get(name)?;
                    Ok(vec![profile.name.clone(), profile.version.to_string()])
                })
                .collect::<Result<Vec<_>>>()?;
            print_table(&["BACKEND", "VERSION"], &rows);
        }
        Command::Capabilities { backend: Some(name) } => {
            let profile = registry.get(&name)?;
            println!("{} (reports {})", profile.name, profile.version);
            let rows: Vec<Vec<String>> = profile
                .capabilities
                .resolved()
                .map(|(flag, supported)| vec![flag.to_string(), yes_no(supported).to_string()])
                .collect();
            print_table(&["FEATURE", "SUPPORTED"], &rows);
        }
        Command::Params {
            backend,
            connect,
            settings,
        } => {
            let mut config = match connect {
                Some(name) => find_saved(&name)?.params,
                None => Map::new(),
            };
            for setting in settings {
                let Some((key, value)) = setting.split_once('=') else {
                    bail!("expected KEY=VALUE, got {:?}", setting);
                };
                config.insert(key.to_string(), Value::String(value.to_string()));
            }
            let params = registry.get(&backend)?.parameter_mapper().normalize(&config)?;
            let rows: Vec<Vec<String>> = params
                .iter()
                .map(|(k, v)| {
                    let v = if k == "password" { "********" } else { v };
                    vec![k.to_string(), v.to_string()]
                })
                .collect();
            print_table(&["KEYWORD", "VALUE"], &rows);
            println!("sslmode: {:?}", params.ssl_mode());
        }
        Command::Sql { backend, query } => {
            let catalog = registry.get(&backend)?.catalog();
            let sql = match query {
                SqlQuery::Columns { table } => catalog.build_column_query(&TableName::parse(&table)),
                SqlQuery::PrimaryKeys { table } => {
                    catalog.build_primary_key_query(&TableName::parse(&table))
                }
                SqlQuery::Types { oids } if oids.is_empty() => catalog.build_type_discovery_query(None),
                SqlQuery::Types { oids } => {
                    let oids: BTreeSet<u32> = oids.into_iter().collect();
                    catalog.build_type_discovery_query(Some(&oids))
                }
                SqlQuery::Tables { schema } => catalog.build_table_list_query(&schema),
            };
            println!("{};", sql);
        }
        Command::Filter {
            backend,
            purpose,
            sql,
        } => match registry.get(&backend)?.statement_filter().filter(&sql, purpose.as_deref()) {
            FilterAction::Execute => println!("execute"),
            FilterAction::Suppress => println!("suppress"),
            FilterAction::Rewrite(replacement) => println!("rewrite: {}", replacement),
        },
        Command::Introspect {
            connect,
            table,
            schema,
        } => {
            let saved = find_saved(&connect)?;
            let profile = registry.get(&saved.backend)?;
            let mut config = saved.params;

            // Resolve password: PGPASSWORD env var, then interactive prompt
            if !config.contains_key("password") {
                let password = match std::env::var("PGPASSWORD") {
                    Ok(pw) => pw,
                    Err(_) => {
                        let prompt = format!("Password for {}: ", saved.name);
                        rpassword::read_password_from_tty(Some(&prompt))?
                    }
                };
                config.insert("password".to_string(), Value::String(password));
            }

            let mut conn = establish_connection(profile, &config).await?;
            match table {
                None => {
                    let rows: Vec<Vec<String>> = conn
                        .introspect_tables(&schema)
                        .await?
                        .into_iter()
                        .map(|t| vec![t.name, t.table_type.label().to_string()])
                        .collect();
                    print_table(&["NAME", "TYPE"], &rows);
                }
                Some(table) => {
                    let keys = conn.introspect_primary_keys(&table).await?;
                    let rows: Vec<Vec<String>> = conn
                        .introspect_columns(&table)
                        .await?
                        .into_iter()
                        .map(|c| {
                            vec![
                                c.name.clone(),
                                c.sql_type,
                                yes_no(c.nullable).to_string(),
                                c.default_value.unwrap_or_default(),
                                if keys.contains(&c.name) { "PK" } else { "" }.to_string(),
                            ]
                        })
                        .collect();
                    print_table(&["COLUMN", "TYPE", "NULL", "DEFAULT", "KEY"], &rows);

                    let foreign_keys = conn.introspect_foreign_keys(&table).await?;
                    if !foreign_keys.is_empty() {
                        println!();
                        let rows: Vec<Vec<String>> = foreign_keys
                            .into_iter()
                            .map(|fk| {
                                vec![
                                    fk.name,
                                    fk.column,
                                    format!("{}({})", fk.to_table, fk.primary_key),
                                    fk.on_delete.label().to_string(),
                                ]
                            })
                            .collect();
                        print_table(&["CONSTRAINT", "COLUMN", "REFERENCES", "ON DELETE"], &rows);
                    }
                }
            }
        }
    }

    Ok(())
}

fn find_saved(name: &str) -> Result<SavedConnection> {
    let path = ConnectionStore::get_config_path();
    match ConnectionStore::find(&path, name)? {
        Some(saved) => Ok(saved),
        None => {
            let known: Vec<String> = ConnectionStore::load(&path)?
                .into_iter()
                .map(|c| c.name)
                .collect();
            bail!(
                "no saved connection named {:?} (saved: {})",
                name,
                known.join(", ")
            )
        }
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Print left-aligned columns padded by display width.
fn print_table(headers: &[&str], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
    for row in rows {
        for (i, cell) in row.iter().enumerate() {
            if let Some(w) = widths.get_mut(i) {
                *w = (*w).max(cell.width());
            }
        }
    }

    let render = |cells: &mut dyn Iterator<Item = &str>| {
        let line: Vec<String> = cells
            .zip(&widths)
            .map(|(cell, width)| format!("{}{}", cell, " ".repeat(width - cell.width())))
            .collect();
        println!("{}", line.join("  ").trim_end());
    };

    render(&mut headers.iter().copied());
    for row in rows {
        render(&mut row.iter().map(String::as_str));
    }
}
