use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use ckan_api::{DataStore, HttpTransport, HttpTransportConfig, RequestMethod, SearchRequest};
use ckan_core::columns::render_cell;
use ckan_core::{SearchResult, SortOptions};
use ckan_query::{Filter, SelectQuery};
use ckan_registry::{render_dropdown, RegistryConfig, RegistryPage, ResourceLocator, TableState};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use serde_json::{Map, Value};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "ckanctl", version, about = "CKAN Data Store client")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Catalog endpoint, e.g. https://catalogue.data.govt.nz/
    #[arg(long = "endpoint", env = "CKAN_ENDPOINT", global = true)]
    endpoint: Option<String>,

    /// Data Store resource id
    #[arg(long = "resource", env = "CKAN_RESOURCE_ID", global = true)]
    resource: Option<String>,

    /// Request timeout in seconds
    #[arg(long = "timeout-secs", env = "CKAN_TIMEOUT_SECS", global = true, default_value_t = 30)]
    timeout_secs: u64,

    /// Send params as a JSON POST body instead of a query string
    #[arg(long = "post", action = ArgAction::SetTrue, global = true)]
    post: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// datastore_search over selected fields
    Search {
        /// Fields to return
        #[arg(required = true)]
        fields: Vec<String>,
        /// Full-text term
        #[arg(long = "q", conflicts_with = "filters")]
        q: Option<String>,
        /// Exact-match filters as a JSON object, e.g. '{"Region":"Otago"}'
        #[arg(long = "filters")]
        filters: Option<String>,
        #[arg(long = "distinct", action = ArgAction::SetTrue)]
        distinct: bool,
        #[arg(long = "limit")]
        limit: Option<u64>,
        #[arg(long = "offset")]
        offset: Option<u64>,
        /// Sort field
        #[arg(long = "sort")]
        sort: Option<String>,
        #[arg(long = "desc", action = ArgAction::SetTrue)]
        desc: bool,
    },
    /// datastore_search_sql with a built SELECT
    Sql(SelectArgs),
    /// Row count for the same SELECT
    Count(SelectArgs),
    /// Distinct non-empty values of one field
    Distinct {
        field: String,
        #[arg(long = "limit")]
        limit: Option<u64>,
    },
    /// Fetch one page of a configured registry
    Page {
        #[command(flatten)]
        registry: RegistryArgs,
        /// Filter value as id=value (repeatable)
        #[arg(long = "filter", value_parser = parse_pair)]
        filter: Vec<(String, String)>,
        #[arg(long = "sort")]
        sort: Option<String>,
        #[arg(long = "desc", action = ArgAction::SetTrue)]
        desc: bool,
        /// Zero-based page number
        #[arg(long = "page", default_value_t = 0)]
        page: u64,
        /// Also render the dropdown filter controls
        #[arg(long = "render-filters", action = ArgAction::SetTrue)]
        render_filters: bool,
    },
    /// Detail view of one record by Data Store row id
    Detail {
        #[command(flatten)]
        registry: RegistryArgs,
        id: u64,
    },
    /// Resolve a catalog dataset/resource URL
    Locate { url: String },
}

#[derive(Args, Debug)]
struct SelectArgs {
    /// Columns to select (default: all)
    #[arg(long = "column")]
    columns: Vec<String>,
    /// column=value equality (repeatable)
    #[arg(long = "equals", value_parser = parse_pair)]
    equals: Vec<(String, String)>,
    /// column=value substring match (repeatable)
    #[arg(long = "contains", value_parser = parse_pair)]
    contains: Vec<(String, String)>,
    #[arg(long = "distinct", action = ArgAction::SetTrue)]
    distinct: bool,
    #[arg(long = "order")]
    order: Option<String>,
    #[arg(long = "desc", action = ArgAction::SetTrue)]
    desc: bool,
    #[arg(long = "limit")]
    limit: Option<u64>,
    #[arg(long = "offset")]
    offset: Option<u64>,
}

#[derive(Args, Debug)]
struct RegistryArgs {
    /// Registry page config (JSON)
    #[arg(long = "config", env = "CKAN_REGISTRY_CONFIG")]
    config: PathBuf,
}

fn init_tracing() {
    let env = std::env::var("CKAN_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("CKAN_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid CKAN_METRICS_ADDR; expected host:port");
        }
    }
}

fn parse_pair(s: &str) -> Result<(String, String), String> {
    match s.split_once('=') {
        Some((k, v)) if !k.trim().is_empty() => Ok((k.trim().to_string(), v.to_string())),
        _ => Err(format!("expected key=value, got {:?}", s)),
    }
}

impl SelectArgs {
    fn build(&self, resource_id: &str) -> SelectQuery {
        let mut q = SelectQuery::new(resource_id).columns(self.columns.iter().cloned()).distinct(self.distinct);
        for (c, v) in &self.equals { q = q.filter(Filter::equals(c.clone(), v.clone())); }
        for (c, v) in &self.contains { q = q.filter(Filter::contains(c.clone(), v.clone())); }
        if let Some(col) = self.order.as_deref() { q = q.order_by(col, !self.desc); }
        if let Some(n) = self.limit { q = q.limit(n); }
        if let Some(n) = self.offset { q = q.offset(n); }
        q
    }
}

fn transport(cli: &Cli) -> Result<Arc<HttpTransport>> {
    let config = HttpTransportConfig {
        timeout: Duration::from_secs(cli.timeout_secs),
        method: if cli.post { RequestMethod::Post } else { RequestMethod::Get },
        ..Default::default()
    };
    Ok(Arc::new(HttpTransport::with_config(config)?))
}

fn store(cli: &Cli) -> Result<DataStore> {
    let endpoint = cli.endpoint.clone().ok_or_else(|| anyhow!("--endpoint (or CKAN_ENDPOINT) is required"))?;
    let resource = cli.resource.clone().ok_or_else(|| anyhow!("--resource (or CKAN_RESOURCE_ID) is required"))?;
    Ok(DataStore::new(endpoint, resource, transport(cli)?))
}

fn registry(cli: &Cli, args: &RegistryArgs) -> Result<(RegistryPage, DataStore)> {
    let config = RegistryConfig::from_path(&args.config)
        .with_context(|| format!("loading registry config {}", args.config.display()))?;
    let ds = DataStore::new(config.endpoint.clone(), config.resource_id.clone(), transport(cli)?);
    Ok((RegistryPage::new(config)?, ds))
}

fn no_result(what: &str) {
    eprintln!("{}: no result (rejected locally or reported unsuccessful by the catalog)", what);
}

fn print_table(headers: &[String], rows: &[Vec<String>]) {
    let mut widths: Vec<usize> = headers.iter().map(|h| h.chars().count()).collect();
    for row in rows {
        for (w, cell) in widths.iter_mut().zip(row) { *w = (*w).max(cell.chars().count()); }
    }
    let line = |cells: &[String]| {
        let padded: Vec<String> = cells.iter().zip(&widths).map(|(c, w)| format!("{:<w$}", c, w = *w)).collect();
        println!("{}", padded.join("  ").trim_end());
    };
    line(&headers.iter().map(|h| h.to_uppercase()).collect::<Vec<_>>());
    for row in rows { line(row); }
}

fn print_records(output: Output, headers: &[String], result: &SearchResult) -> Result<()> {
    match output {
        Output::Human => {
            let headers: Vec<String> = if headers.is_empty() {
                result.records.first().and_then(Value::as_object).map(|o| o.keys().cloned().collect()).unwrap_or_default()
            } else {
                headers.to_vec()
            };
            let rows: Vec<Vec<String>> = result
                .records
                .iter()
                .map(|r| headers.iter().map(|h| r.get(h).map(render_cell).unwrap_or_default()).collect())
                .collect();
            print_table(&headers, &rows);
            if let Some(total) = result.total { println!("({} of {} records)", rows.len(), total); }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(result)?),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Search { fields, q, filters, distinct, limit, offset, sort, desc } => {
            let ds = store(&cli)?;
            info!(resource = %ds.resource_id(), fields = fields.len(), "search invoked");
            let mut req = SearchRequest::new(fields.iter().cloned()).distinct(*distinct);
            if let Some(q) = q { req = req.text(q.clone()); }
            if let Some(raw) = filters {
                let map: Map<String, Value> = serde_json::from_str(raw).context("--filters must be a JSON object")?;
                req = req.filters(map);
            }
            if let Some(n) = limit { req = req.limit(*n); }
            if let Some(n) = offset { req = req.offset(*n); }
            if let Some(field) = sort { req = req.sort(SortOptions::new(field.clone(), !desc)); }
            match ds.search(&req).await? {
                Some(result) => print_records(cli.output, fields, &result)?,
                None => no_result("search"),
            }
        }
        Commands::Sql(args) => {
            let ds = store(&cli)?;
            let q = args.build(ds.resource_id());
            info!(resource = %ds.resource_id(), "sql invoked");
            match ds.search_sql(&q).await? {
                Some(result) => print_records(cli.output, &args.columns, &result)?,
                None => no_result("sql"),
            }
        }
        Commands::Count(args) => {
            let ds = store(&cli)?;
            let q = args.build(ds.resource_id());
            match ds.count_sql(&q).await? {
                Some(n) => match cli.output {
                    Output::Human => println!("{}", n),
                    Output::Json => println!("{}", serde_json::json!({ "count": n })),
                },
                None => no_result("count"),
            }
        }
        Commands::Distinct { field, limit } => {
            let ds = store(&cli)?;
            match ds.distinct_values(field, *limit).await? {
                Some(values) => match cli.output {
                    Output::Human => values.iter().for_each(|v| println!("{}", v)),
                    Output::Json => println!("{}", serde_json::to_string_pretty(&values)?),
                },
                None => no_result("distinct"),
            }
        }
        Commands::Page { registry: args, filter, sort, desc, page, render_filters } => {
            let (reg, ds) = registry(&cli, args)?;
            let mut state = TableState::default().on_page(*page);
            for (id, value) in filter { state = state.with_filter(id.clone(), value.clone()); }
            if let Some(field) = sort { state = state.sorted(field.clone(), !desc); }
            match reg.fetch(&ds, &state).await? {
                Some(view) => match cli.output {
                    Output::Human => {
                        let headers: Vec<String> = view.columns.iter().map(|c| c.label.clone()).collect();
                        print_table(&headers, &view.rows);
                        println!("page {} of {} ({} records)", view.page + 1, view.page_count.max(1), view.total);
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&view)?),
                },
                None => no_result("page"),
            }
            if *render_filters {
                for f in reg.config().ordered_filters() {
                    match reg.dropdown(&ds, &f.id, &state).await? {
                        Some(d) => println!("{}", render_dropdown(&d)),
                        None => info!(filter = %f.id, "no dropdown for filter"),
                    }
                }
            }
        }
        Commands::Detail { registry: args, id } => {
            let (reg, ds) = registry(&cli, args)?;
            match reg.detail(&ds, *id).await? {
                Some(view) => match cli.output {
                    Output::Human => {
                        let width = view.entries.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
                        for (label, value) in &view.entries { println!("{:<w$}  {}", label, value, w = width); }
                    }
                    Output::Json => println!("{}", serde_json::to_string_pretty(&view)?),
                },
                None => no_result("detail"),
            }
        }
        Commands::Locate { url } => {
            let loc = ResourceLocator::from_url(url)?;
            match cli.output {
                Output::Human => {
                    println!("endpoint: {}", loc.endpoint);
                    println!("dataset:  {}", loc.dataset.as_deref().unwrap_or("-"));
                    println!("resource: {}", loc.resource.as_deref().unwrap_or("-"));
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&loc)?),
            }
        }
    }

    Ok(())
}
