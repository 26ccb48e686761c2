// Entry point and terminal front end.
//
// - `ooh-dash manifest <dir>` writes the data manifest for a local folder.
// - Plain `ooh-dash` asks for a password and opens the dashboard menu,
//   which drives a session: load, filter, inspect results, export.
use clap::{Parser, Subcommand};
use log::{debug, error};
use ooh_dash::auth::{authenticate, Role};
use ooh_dash::config::Config;
use ooh_dash::error::DashboardError;
use ooh_dash::filters::{Dimension, FilterSelection};
use ooh_dash::loader::DataSource;
use ooh_dash::plan::{MediaPlan, PlanItem};
use ooh_dash::session::{Session, SessionState};
use ooh_dash::{manifest, output, util};
use std::io::{self, Write};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "ooh-dash", version, about = "OOH campaign analytics in the terminal")]
struct Cli {
    /// TOML config file (defaults to ./ooh-dash.toml when present)
    #[arg(long, env = "OOH_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Write data-manifest.json listing every parquet file under DIR
    Manifest { dir: PathBuf },
}

/// Print `label` and read one trimmed line from stdin.
fn prompt(label: &str) -> String {
    print!("{}", label);
    let _ = io::stdout().flush();
    let mut buf = String::new();
    io::stdin().read_line(&mut buf).ok();
    buf.trim().to_string()
}

/// Read a menu selection.
fn read_choice() -> String {
    prompt("Enter choice: ")
}

/// Ask for a password, up to three attempts.
fn login(config: &Config) -> Option<Role> {
    for _ in 0..3 {
        let password = prompt("Password: ");
        match authenticate(&password, &config.auth) {
            Ok(role) => return Some(role),
            Err(e) => println!("{}\n", e),
        }
    }
    None
}

/// Print the session error, if there is one.
fn report_error(state: &SessionState) {
    if let Some(e) = &state.error {
        println!("Error: {}\n", e);
    }
}

/// Handle option [1]: load the dataset and wait for the first bundle.
async fn handle_load(session: &Session) -> Result<(), DashboardError> {
    println!("Loading dataset...");
    session.load()?;
    let state = session.settled().await;
    match state.rows {
        Some(rows) if state.error.is_none() => {
            println!("Dataset ready: {} rows\n", util::format_int(rows));
        }
        _ => report_error(&state),
    }
    Ok(())
}

/// Ask for a filter dimension by its URL key.
fn read_dimension() -> Option<Dimension> {
    let keys: Vec<&str> = Dimension::ALL.iter().map(|d| d.key()).collect();
    let answer = prompt(&format!("Dimension ({}): ", keys.join("/")));
    let dimension = Dimension::from_key(&answer.to_lowercase());
    if dimension.is_none() {
        println!("Unknown dimension {:?}.\n", answer);
    }
    dimension
}

/// Handle option [2]: replace the values of one dimension.
async fn handle_set_filter(session: &Session) -> Result<(), DashboardError> {
    let Some(dimension) = read_dimension() else {
        return Ok(());
    };
    let answer = prompt("Values, comma separated (empty clears): ");
    let tokens: Vec<String> = answer
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();
    session.set_filters(dimension, tokens)?;
    let state = session.settled().await;
    report_error(&state);
    println!("Filters: {}\n", describe(&state.filters));
    Ok(())
}

/// One-line summary of the active filters.
fn describe(filters: &FilterSelection) -> String {
    if filters.is_empty() {
        return "(none)".to_string();
    }
    Dimension::ALL
        .iter()
        .filter(|d| !filters.get(**d).is_empty())
        .map(|d| format!("{} = {}", d, filters.get(*d).join(", ")))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Handle option [3]: KPIs and a preview of every result table.
async fn handle_dashboard(session: &Session) {
    let state = session.settled().await;
    if state.rows.is_none() {
        println!("Error: No data loaded. Please load the dataset first (option 1).\n");
        return;
    }
    report_error(&state);
    let bundle = &state.bundle;
    println!("Filters: {}", describe(&state.filters));
    println!("Средний GRP: {}", util::format_number(bundle.kpis.avg_grp, 3));
    println!("OTS (тыс.): {}", util::format_compact(bundle.kpis.total_ots));
    println!("Поверхностей: {}", util::format_int(bundle.kpis.unique_surfaces.0));

    output::preview_table("Динамика GRP", Some("по месяцам"), &bundle.trend_data, 12);
    output::preview_table("Город × формат", None, &bundle.matrix_data, 10);
    output::preview_table("Отчёт", Some("город, формат, период"), &bundle.report_data, 10);
    output::preview_table("Поверхности", Some("адресная программа"), &bundle.map_data, 5);
}

/// Handle option [4]: the values each filter can still take.
async fn handle_options(session: &Session) {
    let options = session.settled().await.bundle.options;
    let lists = [
        (Dimension::City, &options.cities),
        (Dimension::Year, &options.years),
        (Dimension::Month, &options.months),
        (Dimension::Format, &options.formats),
        (Dimension::Vendor, &options.vendors),
    ];
    for (dimension, values) in lists {
        println!("{} ({}): {}", dimension, values.len(), values.join(", "));
    }
    println!();
}

/// Handle option [6]: replace all filters from a URL query string.
async fn handle_apply_url(session: &Session) -> Result<(), DashboardError> {
    let query = prompt("Query string: ");
    session.replace_filters(FilterSelection::from_query_string(&query))?;
    let state = session.settled().await;
    report_error(&state);
    println!("Filters: {}\n", describe(&state.filters));
    Ok(())
}

/// Handle option [8]: write the report CSVs for the current filters.
async fn handle_export(session: &Session, config: &Config) -> Result<(), DashboardError> {
    let state = session.settled().await;
    let today = chrono::Local::now().date_naive();
    let written = output::export_report(&state.bundle.report_data, &config.output_dir, today)?;
    if written.is_empty() {
        println!("Nothing to export for the current filters.\n");
    }
    for path in written {
        println!("(Exported {})", path.display());
    }
    println!();
    Ok(())
}

/// Handle option [9]: the media plan submenu.
async fn handle_plan(session: &Session, plan: &mut MediaPlan, config: &Config) -> Result<(), DashboardError> {
    loop {
        println!("Media plan: {} items", plan.len());
        println!("[1] Add current report rows");
        println!("[2] Toggle surface by address");
        println!("[3] Show plan");
        println!("[4] Export plan");
        println!("[5] Clear plan");
        println!("[0] Back\n");
        match read_choice().as_str() {
            "1" => {
                let state = session.settled().await;
                let added = state
                    .bundle
                    .report_data
                    .iter()
                    .filter(|row| plan.add(PlanItem::from_report(row)))
                    .count();
                println!("Added {} rows.\n", added);
            }
            "2" => {
                let address = prompt("Address: ");
                let state = session.settled().await;
                match state.bundle.map_data.iter().find(|r| r.address == address) {
                    Some(row) => {
                        let planned = plan.toggle(PlanItem::from_map(row));
                        println!("{}\n", if planned { "Added." } else { "Removed." });
                    }
                    None => println!("No surface with that address in the current results.\n"),
                }
            }
            "3" => {
                for group in plan.by_city() {
                    println!(
                        "{}: {} items, GRP {}, OTS {}",
                        group.city,
                        group.items.len(),
                        util::format_number(group.avg_grp, 3),
                        util::format_number(group.total_ots, 1)
                    );
                    for item in &group.items {
                        println!("  {} | {} | {}", item.title, item.format, item.period);
                    }
                }
                let totals = plan.totals();
                println!(
                    "ИТОГО: GRP {}, OTS {}\n",
                    util::format_number(totals.avg_grp, 3),
                    util::format_number(totals.total_ots, 1)
                );
            }
            "4" => {
                let today = chrono::Local::now().date_naive();
                for path in output::export_plan(plan, &config.output_dir, today)? {
                    println!("(Exported {})", path.display());
                }
                println!();
            }
            "5" => {
                plan.clear();
                println!("Plan cleared.\n");
            }
            "0" => return Ok(()),
            _ => println!("Invalid choice.\n"),
        }
    }
}

/// Main menu loop for a signed-in user.
async fn dashboard(role: Role, config: &Config) -> Result<(), DashboardError> {
    let source = DataSource::from_root(&config.data_root, &config.data_path);
    let session = Session::start(role, source, config.columns.clone(), config.debounce());
    let mut plan = MediaPlan::default();

    loop {
        println!("[1] Load data");
        println!("[2] Set filter");
        println!("[3] Show dashboard");
        println!("[4] Show filter options");
        println!("[5] Show shareable URL");
        println!("[6] Apply URL query string");
        println!("[7] Reset filters");
        if role.can_export() {
            println!("[8] Export reports");
            println!("[9] Media plan");
        }
        println!("[0] Logout and exit\n");
        match read_choice().as_str() {
            "1" => handle_load(&session).await?,
            "2" => handle_set_filter(&session).await?,
            "3" => handle_dashboard(&session).await,
            "4" => handle_options(&session).await,
            "5" => {
                let query = session.state().filters.to_query_string();
                println!("?{}\n", query);
            }
            "6" => handle_apply_url(&session).await?,
            "7" => {
                session.reset_filters()?;
                report_error(&session.settled().await);
                println!("Filters cleared.\n");
            }
            "8" if role.can_export() => handle_export(&session, config).await?,
            "9" if role.can_export() => handle_plan(&session, &mut plan, config).await?,
            "0" => {
                let state = session.logout().await;
                debug!("final session state: {:?}", state.phase);
                println!("Logged out.");
                return Ok(());
            }
            _ => println!("Invalid choice.\n"),
        }
    }
}

async fn run(cli: Cli) -> Result<(), DashboardError> {
    let config = Config::load(cli.config.as_deref())?;
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(config.log_level.as_str()))
        .init();

    if let Some(Command::Manifest { dir }) = cli.command {
        let files = manifest::write_manifest(&dir)?;
        println!("Wrote manifest with {} files.", util::format_int(files.len()));
        return Ok(());
    }

    let Some(role) = login(&config) else {
        println!("Too many failed attempts.");
        return Ok(());
    };
    println!("Signed in as {:?}.\n", role);
    dashboard(role, &config).await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        error!("{}", e);
        eprintln!("{}", e);
        std::process::exit(1);
    }
}
