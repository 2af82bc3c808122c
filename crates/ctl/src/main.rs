#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! buildlogctl: page through a registry's build history and resolve build log links.

use anyhow::Context;
use buildlog_core::{BuildFilter, CatalogError, RemoteCatalog};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod source;

use crate::config::{Config, RegistryArgs};
use crate::source::HttpBuildSource;

type Catalog = RemoteCatalog<HttpBuildSource>;

#[derive(Parser, Debug)]
#[command(name = "buildlogctl")]
struct Args {
    #[command(flatten)]
    registry: RegistryArgs,

    /// Log level (env-filter syntax). Logs go to stderr.
    #[arg(long, env = "BUILDLOG_LOG", default_value = "info")]
    log: String,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Print loaded builds as JSON lines.
    List {
        /// Pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Print the log link of one build.
    Link {
        /// Position of the build in the (filtered) listing.
        #[arg(long)]
        index: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
    /// Resolve the log links of every loaded build.
    Warm {
        /// Pages to load.
        #[arg(long, default_value_t = 1)]
        pages: usize,
        /// Log link requests in flight at once.
        #[arg(long, default_value_t = 8)]
        concurrency: usize,
        #[command(flatten)]
        filter: FilterArgs,
    },
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// Only builds started by this build task.
    #[arg(long, conflicts_with_all = ["repository", "image"])]
    task: Option<String>,
    /// Only builds that pushed to this repository.
    #[arg(long, conflicts_with = "image")]
    repository: Option<String>,
    /// Only builds that pushed this image (`repo:tag` or a bare tag).
    #[arg(long)]
    image: Option<String>,
}

impl FilterArgs {
    fn into_filter(self) -> BuildFilter {
        match (self.task, self.repository, self.image) {
            (Some(task), _, _) => BuildFilter::Task(task),
            (_, Some(repository), _) => BuildFilter::Repository(repository),
            (_, _, Some(image)) => BuildFilter::Image(image),
            _ => BuildFilter::All,
        }
    }
}

#[derive(Serialize)]
struct WarmLine<'a> {
    index: usize,
    build_id: &'a str,
    url: &'a str,
}

fn open_catalog(source: HttpBuildSource, filter: FilterArgs) -> Catalog {
    let filter = filter.into_filter();
    if filter.is_all() {
        RemoteCatalog::new(source)
    } else {
        RemoteCatalog::new(source).with_filter(filter)
    }
}

/// Load one page. Returns false once the registry has nothing more.
async fn load_one(catalog: &Catalog) -> anyhow::Result<bool> {
    match catalog.load_next().await {
        Ok(_) => Ok(catalog.has_more()),
        Err(CatalogError::NoMorePages) => {
            info!(loaded = catalog.len(), "no more builds to load");
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}

async fn load_pages(catalog: &Catalog, pages: usize) -> anyhow::Result<()> {
    for _ in 0..pages {
        if !load_one(catalog).await? {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cfg = Config::from_args(args.registry)?;
    info!(endpoint = %cfg.endpoint, registry = %cfg.registry, "connecting");
    let source = HttpBuildSource::new(cfg)?;

    match args.cmd {
        Cmd::List { pages, filter } => {
            let catalog = open_catalog(source, filter);
            load_pages(&catalog, pages).await?;
            for build in catalog.records() {
                println!("{}", serde_json::to_string(&build)?);
            }
        }
        Cmd::Link { index, filter } => {
            let catalog = open_catalog(source, filter);
            while catalog.len() <= index && catalog.has_more() {
                load_one(&catalog).await?;
            }
            let lookup = catalog.resolve_link(index).await?;
            let url = lookup.url().context("log link resolution already in progress")?;
            println!("{url}");
        }
        Cmd::Warm {
            pages,
            concurrency,
            filter,
        } => {
            let catalog = open_catalog(source, filter);
            load_pages(&catalog, pages).await?;

            let links = catalog.bulk_resolve(concurrency).await?;
            let records = catalog.records();
            for link in &links {
                let line = WarmLine {
                    index: link.index,
                    build_id: records.get(link.index).map_or("", |b| b.build_id.as_str()),
                    url: &link.url,
                };
                println!("{}", serde_json::to_string(&line)?);
            }

            let unresolved = catalog.slots().iter().filter(|s| !s.is_resolved()).count();
            info!(resolved = links.len(), unresolved, "warm-up finished");
        }
    }
    Ok(())
}
