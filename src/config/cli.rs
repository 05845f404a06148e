use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};

/// Command-line arguments for the postsync binary.
#[derive(Debug, Parser)]
#[command(
    name = "postsync",
    version,
    about = "Post store with a Postgres source of truth, a Redis cache and an Elasticsearch index"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(
        long = "config-file",
        env = "POSTSYNC_CONFIG_FILE",
        value_name = "PATH",
        global = true
    )]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Apply migrations and create the search index mapping.
    Init,
    /// Report the availability of each store.
    Health,
    /// Create a post.
    Create(CreateArgs),
    /// Fetch a post by id through the cache.
    Get(GetArgs),
    /// Change some fields of a post.
    Update(UpdateArgs),
    /// List posts carrying a tag, newest first.
    #[command(name = "by-tag")]
    ByTag(ByTagArgs),
    /// Full-text search over titles and contents.
    Search(SearchArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,

    /// Override the Redis connection URL.
    #[arg(long = "cache-url", value_name = "URL", global = true)]
    pub cache_url: Option<String>,

    /// Disable or enable the Redis cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub cache_enabled: Option<bool>,

    /// Override the Elasticsearch base URL.
    #[arg(long = "search-url", value_name = "URL", global = true)]
    pub search_url: Option<String>,

    /// Disable or enable the search index.
    #[arg(
        long = "search-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub search_enabled: Option<bool>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Emit logs as JSON.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Clone)]
pub struct CreateArgs {
    #[arg(long)]
    pub title: String,

    #[arg(long)]
    pub content: String,

    /// Tag to attach; repeat for several.
    #[arg(long = "tag", value_name = "TAG")]
    pub tags: Vec<String>,
}

#[derive(Debug, Args, Clone)]
pub struct GetArgs {
    pub id: i64,
}

#[derive(Debug, Args, Clone)]
pub struct UpdateArgs {
    pub id: i64,

    #[arg(long)]
    pub title: Option<String>,

    #[arg(long)]
    pub content: Option<String>,

    /// Replace the tag set; repeat for several.
    #[arg(long = "tag", value_name = "TAG", conflicts_with = "clear_tags")]
    pub tags: Vec<String>,

    /// Remove every tag.
    #[arg(long = "clear-tags", action = clap::ArgAction::SetTrue)]
    pub clear_tags: bool,
}

#[derive(Debug, Args, Clone)]
pub struct ByTagArgs {
    pub tag: String,
}

#[derive(Debug, Args, Clone)]
pub struct SearchArgs {
    pub query: String,
}
