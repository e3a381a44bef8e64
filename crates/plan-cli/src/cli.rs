use std::path::PathBuf;

use clap::{ArgAction, Args, Parser, Subcommand};
use plan_index::Relation;

#[derive(Parser)]
#[command(
    name = "planctl",
    about = "Plan store: fingerprinted plan records with a searchable projection",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Repeat for more log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Record directory; overrides [store] data_dir
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Print the fingerprint of a JSON document
    Fingerprint(DocumentArgs),
    /// Deep-merge a patch document into a base document
    Merge(MergeArgs),
    /// Check a document against the plan schema
    Validate(DocumentArgs),
    /// Store a new plan
    Create(CreateArgs),
    /// Show a stored plan
    Get(GetArgs),
    /// Overwrite a stored plan
    Replace(WriteArgs),
    /// Deep-merge a partial document into a stored plan
    Patch(WriteArgs),
    /// Delete a plan, or a nested entity wherever it is stored
    Delete(DeleteArgs),
    /// Rebuild the search projection and run a query
    Search(SearchArgs),
    /// Print the durable dead-letter log
    DeadLetters(DeadLettersArgs),
}

#[derive(Args)]
pub struct DocumentArgs {
    /// JSON file, or `-` for stdin
    pub path: PathBuf,
}

#[derive(Args)]
pub struct MergeArgs {
    pub base: PathBuf,
    pub patch: PathBuf,
}

#[derive(Args)]
pub struct CreateArgs {
    pub path: PathBuf,
    #[arg(long, default_value = "planctl")]
    pub actor: String,
}

#[derive(Args)]
pub struct GetArgs {
    pub id: String,
    /// Print nothing if this is still the current fingerprint
    #[arg(long)]
    pub if_none_match: Option<String>,
}

#[derive(Args)]
pub struct WriteArgs {
    pub id: String,
    pub path: PathBuf,
    /// Fingerprint the plan must still have
    #[arg(long)]
    pub if_match: Option<String>,
    #[arg(long, default_value = "planctl")]
    pub actor: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    pub id: String,
    #[arg(long, default_value = "planctl")]
    pub actor: String,
}

#[derive(Args)]
pub struct SearchArgs {
    #[command(subcommand)]
    pub query: SearchQuery,
}

#[derive(Subcommand)]
pub enum SearchQuery {
    /// Plans of an organization
    Org { org: String },
    /// Plans of a plan type
    PlanType { plan_type: String },
    /// Plans containing a service group
    Service { service_id: String },
    /// Plans whose cost-share copay is at least MIN
    Copay { min: i64 },
    /// Descendants of a plan
    Children {
        plan_id: String,
        #[arg(long)]
        relation: Option<Relation>,
    },
}

#[derive(Args)]
pub struct DeadLettersArgs {
    /// Log file; defaults to [dead_letter] path
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "planctl", "get", "P1", "--data-dir", "/tmp/plans", "-vv", "--format", "json",
        ]);
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/plans")));
        assert!(matches!(cli.command, Command::Get(GetArgs { ref id, .. }) if id == "P1"));
    }

    #[test]
    fn parses_relation_filter() {
        let cli = Cli::parse_from([
            "planctl", "search", "children", "P1", "--relation", "linkedService",
        ]);
        let Command::Search(SearchArgs { query: SearchQuery::Children { relation, .. } }) =
            cli.command
        else {
            panic!("expected search children");
        };
        assert_eq!(relation, Some(Relation::LinkedService));
    }

    #[test]
    fn rejects_unknown_relation() {
        let parsed = Cli::try_parse_from([
            "planctl", "search", "children", "P1", "--relation", "member",
        ]);
        assert!(parsed.is_err());
    }
}
