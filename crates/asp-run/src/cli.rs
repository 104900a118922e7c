use std::{
    fs,
    io::{self, BufWriter, Read, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use asp_lang::{Config, Document, Host, HttpRequest, LogFormat, RequestData, RequestOutcome};
use clap::Parser;
use itertools::Itertools;
use miette::{IntoDiagnostic, WrapErr, miette};
use rayon::prelude::*;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug, Default)]
#[command(name = "asp-run")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(after_help = "# Examples:\n\n\
    ## Render one parsed page:\n\
    asp-run page.json\n\n\
    ## Render with query parameters and application events:\n\
    asp-run --global global.json --query id=7 page.json\n\n\
    ## Read the document from stdin:\n\
    asp-run - < page.json")]
#[command(
    about = "Runs pre-parsed server pages as requests against one shared host.",
    long_about = None
)]
pub struct Cli {
    #[clap(flatten)]
    request: RequestArgs,

    #[clap(flatten)]
    runtime: RuntimeArgs,

    /// Document declaring Application_OnStart, Session_OnStart and Application_OnEnd
    #[arg(short, long)]
    global: Option<PathBuf>,

    /// Number of documents to run before switching to parallel execution
    #[arg(short = 'P', default_value_t = 10)]
    parallel_threshold: usize,

    /// Report each request as a JSON line instead of printing raw output
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Parsed documents to run, `-` for stdin
    #[arg(value_name = "FILE", required = true)]
    files: Vec<PathBuf>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct RequestArgs {
    /// Request method seen by the script
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Query string parameter
    #[arg(short, long, value_name = "KEY=VALUE")]
    query: Vec<String>,

    /// Form field
    #[arg(long, value_name = "KEY=VALUE")]
    form: Vec<String>,

    /// Request cookie
    #[arg(long, value_name = "KEY=VALUE")]
    cookie: Vec<String>,
}

#[derive(Clone, Debug, clap::Args, Default)]
struct RuntimeArgs {
    /// Script timeout in seconds
    #[arg(long, value_name = "SECONDS")]
    timeout: Option<u64>,

    /// Maximum depth of nested procedure calls
    #[arg(long)]
    max_call_depth: Option<u32>,

    /// Lower bound of declared arrays
    #[arg(long, value_parser = clap::value_parser!(i64).range(0..=1))]
    option_base: Option<i64>,

    /// Directory Server.MapPath resolves against
    #[arg(long)]
    root_dir: Option<PathBuf>,

    /// Log filter, in `RUST_LOG` syntax
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format
    #[arg(long, value_enum)]
    log_format: Option<LogFormatArg>,
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum LogFormatArg {
    Text,
    Json,
}

impl From<LogFormatArg> for LogFormat {
    fn from(format: LogFormatArg) -> Self {
        match format {
            LogFormatArg::Text => LogFormat::Text,
            LogFormatArg::Json => LogFormat::Json,
        }
    }
}

pub fn init_tracing(config: &Config) {
    let env_filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_writer(io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().with_writer(io::stderr))
                .init();
        }
    }
}

impl Cli {
    pub fn run(&self) -> miette::Result<()> {
        let config = self.config();
        init_tracing(&config);

        let host = Host::new(config);
        if let Some(global) = &self.global {
            host.set_global(Arc::new(load_document(global)?));
        }

        let request = self.request_data()?;
        let documents = self
            .files
            .iter()
            .map(|file| load_document(file).map(|document| (file, Arc::new(document))))
            .collect::<miette::Result<Vec<_>>>()?;
        tracing::debug!(documents = documents.len(), "documents loaded");

        let run = |(file, document): &(_, Arc<Document>)| {
            let outcome = host.execute(
                HttpRequest::new(Arc::clone(document)).with_request(request.clone()),
            );
            (*file, outcome)
        };
        let outcomes: Vec<(&PathBuf, RequestOutcome)> = if documents.len() > self.parallel_threshold {
            documents.par_iter().map(run).collect()
        } else {
            documents.iter().map(run).collect()
        };

        let result = self.report(outcomes);
        host.shutdown().map_err(|error| miette::Report::new(*error))?;
        result
    }

    fn config(&self) -> Config {
        let mut config = Config::from_env();
        let runtime = &self.runtime;
        if let Some(seconds) = runtime.timeout {
            config.script_timeout = Duration::from_secs(seconds);
        }
        if let Some(depth) = runtime.max_call_depth {
            config.max_call_depth = depth;
        }
        if let Some(base) = runtime.option_base {
            config.option_base = base;
        }
        if let Some(root_dir) = &runtime.root_dir {
            config.root_dir = root_dir.clone();
        }
        if let Some(log_level) = &runtime.log_level {
            config.log_level = log_level.clone();
        }
        if let Some(log_format) = runtime.log_format {
            config.log_format = log_format.into();
        }
        config
    }

    fn request_data(&self) -> miette::Result<RequestData> {
        let args = &self.request;
        let mut request = RequestData::new(&args.method.to_uppercase(), "/");
        for (key, value) in parse_pairs(&args.query)? {
            request = request.with_query(key, value);
        }
        for (key, value) in parse_pairs(&args.form)? {
            request = request.with_form(key, value);
        }
        for (key, value) in parse_pairs(&args.cookie)? {
            request = request.with_cookie(key, value);
        }
        Ok(request)
    }

    /// Writes every outcome in input order, then fails with the first error.
    fn report(&self, outcomes: Vec<(&PathBuf, RequestOutcome)>) -> miette::Result<()> {
        let stdout = io::stdout();
        let mut handle = BufWriter::new(stdout.lock());
        let mut first_error = None;

        for (file, outcome) in outcomes {
            if self.json {
                let line = serde_json::json!({
                    "file": file.display().to_string(),
                    "id": outcome.id,
                    "status": outcome.response.status,
                    "content_type": outcome.response.content_type,
                    "output": outcome.output(),
                    "error": outcome.error.as_ref().map(|error| error.to_string()),
                    "elapsed_ms": outcome.elapsed.as_millis() as u64,
                });
                writeln!(handle, "{}", line).into_diagnostic()?;
            } else {
                write!(handle, "{}", outcome.output()).into_diagnostic()?;
            }

            if first_error.is_none() {
                first_error = outcome.error;
            }
        }
        handle.flush().into_diagnostic()?;

        match first_error {
            Some(error) => Err(miette::Report::new(*error)),
            None => Ok(()),
        }
    }
}

fn load_document(path: &Path) -> miette::Result<Document> {
    let json = if path == Path::new("-") {
        let mut input = String::new();
        io::stdin().read_to_string(&mut input).into_diagnostic()?;
        input
    } else {
        fs::read_to_string(path)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to read {}", path.display()))?
    };

    Document::from_json(&json)
        .into_diagnostic()
        .wrap_err_with(|| format!("{} is not a parsed document", path.display()))
}

fn parse_pairs(pairs: &[String]) -> miette::Result<Vec<(&str, &str)>> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .ok_or_else(|| miette!("expected KEY=VALUE, got '{}'", pair))
        })
        .try_collect()
}
