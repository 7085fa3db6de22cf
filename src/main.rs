use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use console::style;

use chartreport::backend::{InfluxBackend, PrometheusBackend};
use chartreport::config::{parse_query, validate_host_port};
use chartreport::dashboard::parse_dashboards;
use chartreport::mail::{Mailer, SmtpMailer};
use chartreport::{
    Backend, ConfigError, EmailConfig, FailurePolicy, LineChartRenderer, QueryTask, Report,
    ReportConfig, as_overhead,
};

/// Runs a set of metrics queries and stacks the charts into one PNG report.
#[derive(Parser, Debug, Clone)]
#[command(version, about)]
struct Args {
    /// Path to save the .png image to.
    #[arg(long, default_value = "out.png")]
    png_path: Utf8PathBuf,

    /// Prometheus server, e.g. localhost:9090.
    #[arg(long, value_name = "HOST:PORT", conflicts_with = "influx")]
    prometheus: Option<String>,

    /// InfluxDB server, e.g. localhost:8086.
    #[arg(long, value_name = "HOST:PORT", requires = "database")]
    influx: Option<String>,

    /// InfluxDB database to query.
    #[arg(long)]
    database: Option<String>,

    /// Grafana dashboards exported as JSON, one per line.
    #[arg(long, value_name = "FILE")]
    dashboards: Option<Utf8PathBuf>,

    /// A single query, may be repeated.
    #[arg(long = "query", value_name = "LABEL=EXPR")]
    queries: Vec<String>,

    /// How many queries may run at once.
    #[arg(long, default_value_t = 3)]
    concurrency: usize,

    /// Deadline for each query.
    #[arg(long, default_value_t = 1000)]
    timeout_ms: u64,

    /// Abort the whole report on the first failed panel.
    #[arg(long)]
    fail_fast: bool,

    /// Header written above the first panel.
    #[arg(long)]
    title: Option<String>,

    #[arg(long, default_value_t = 600)]
    width: u32,

    #[arg(long, default_value_t = 600)]
    height: u32,

    /// Address to send the report from, e.g. 'Reports <reports@example.com>'.
    #[arg(long)]
    email_from: Option<String>,

    /// Comma separated recipients.
    #[arg(long)]
    email_to: Option<String>,

    #[arg(long)]
    email_subject: Option<String>,

    /// SMTP relay, e.g. localhost:25.
    #[arg(long, value_name = "HOST:PORT")]
    smtp_host_port: Option<String>,
}

impl Args {
    fn config(&self) -> Result<ReportConfig, ConfigError> {
        let email = EmailConfig::from_parts(
            self.email_from.clone(),
            self.email_to.clone(),
            self.email_subject.clone(),
            self.smtp_host_port.clone(),
        )?;

        Ok(ReportConfig {
            concurrency: self.concurrency,
            timeout: Duration::from_millis(self.timeout_ms),
            width: self.width,
            height: self.height,
            policy: match self.fail_fast {
                true => FailurePolicy::FailFast,
                false => FailurePolicy::Degrade,
            },
            title: self.title.clone(),
            png_path: self.png_path.clone(),
            email,
            ..Default::default()
        })
    }

    /// Dashboard tasks first, then the ones given with `--query`.
    fn tasks(&self) -> anyhow::Result<Vec<QueryTask>> {
        let mut tasks = vec![];

        if let Some(path) = &self.dashboards {
            let file = File::open(path).with_context(|| format!("Couldn't open {path}"))?;
            for dashboard in parse_dashboards(BufReader::new(file))? {
                tasks.extend(dashboard.tasks());
            }
        }

        for query in &self.queries {
            tasks.push(parse_query(query)?);
        }

        if tasks.is_empty() {
            bail!(ConfigError::NoTasks);
        }

        Ok(tasks)
    }

    fn backend(&self) -> anyhow::Result<Arc<dyn Backend>> {
        match (&self.prometheus, &self.influx) {
            (Some(host_port), _) => {
                validate_host_port(host_port)?;
                Ok(Arc::new(PrometheusBackend::new(host_port)?))
            }
            (None, Some(host_port)) => {
                validate_host_port(host_port)?;
                let database = self.database.clone().unwrap_or_default();
                Ok(Arc::new(InfluxBackend::new(host_port, database)?))
            }
            (None, None) => bail!("Specify a backend with --prometheus or --influx"),
        }
    }
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    chartreport::init_logging()?;

    let s = Instant::now();

    let config = args.config()?;
    let tasks = args.tasks()?;
    let backend = args.backend()?;

    let renderer = LineChartRenderer::new(config.chart_width, config.chart_height);
    let report = Report::new(config);

    let image = report.generate(&tasks, backend, &renderer)?;

    let mailer = match &report.config().email {
        Some(email) => Some(SmtpMailer::new(&email.smtp_host_port, &email.from)?),
        None => None,
    };
    report.publish(&image, mailer.as_ref().map(|m| m as &dyn Mailer))?;

    println!(
        "{} {} {}",
        style("Saved").green(),
        report.config().png_path,
        as_overhead(s)
    );

    Ok(())
}
