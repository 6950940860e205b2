use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};

use aipply_core::{
    partition_by_recommendation, ApplicationDraft, ApplicationStatus, OpportunityDraft, Priority,
    ProjectStage, UserProfile,
};
use aipply_repos::{
    ApplicationRepository, KvProfileService, OpportunityRepository, ProfileService, SaveOutcome,
};
use aipply_search::{SearchConfig, SearchGateway, SearchParams};
use aipply_store::FileKvStore;

#[derive(Debug, Parser)]
#[command(name = "aipply")]
#[command(about = "AIpply application and opportunity tracker")]
struct Cli {
    /// Email scoping per-user collections.
    #[arg(long, env = "AIPPLY_USER", global = true)]
    user: Option<String>,

    #[arg(long, env = "AIPPLY_DATA_DIR", default_value = "./data", global = true)]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(subcommand)]
    Applications(ApplicationsCommand),
    #[command(subcommand)]
    Opportunities(OpportunitiesCommand),
    #[command(subcommand)]
    Profiles(ProfilesCommand),
    Search {
        #[arg(long, default_value = "")]
        keyword: String,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        kind: Option<String>,
    },
}

#[derive(Debug, Subcommand)]
enum ApplicationsCommand {
    List,
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        position: String,
        #[arg(long)]
        applicant: String,
        #[arg(long)]
        submitted_date: NaiveDate,
        #[arg(long, default_value = "medium")]
        priority: String,
        #[arg(long)]
        funding: Option<f64>,
        #[arg(long)]
        price: Option<f64>,
    },
    SetStatus {
        id: String,
        status: String,
    },
    Delete {
        id: String,
    },
}

#[derive(Debug, Subcommand)]
enum OpportunitiesCommand {
    List,
    Add {
        #[arg(long)]
        title: String,
        #[arg(long)]
        company: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long)]
        kind: String,
        #[arg(long, default_value = "")]
        tags: String,
        #[arg(long, default_value = "")]
        link: String,
        #[arg(long)]
        project_stage: Option<String>,
        #[arg(long)]
        sector: Option<String>,
        #[arg(long)]
        business_model: Option<String>,
        #[arg(long)]
        team_size: Option<String>,
    },
    Delete {
        id: String,
    },
    Save {
        id: String,
    },
    Unsave {
        id: String,
    },
    Saved,
}

#[derive(Debug, Subcommand)]
enum ProfilesCommand {
    List,
    Create {
        uid: String,
        email: String,
    },
    Recommend {
        uid: String,
        #[arg(required = true)]
        ids: Vec<String>,
    },
    SetAdmin {
        uid: String,
        #[arg(long)]
        is_admin: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let store = FileKvStore::open(cli.data_dir.join("aipply.json"))?;
    let registry = KvProfileService::new(&store);

    match cli.command {
        Commands::Applications(command) => {
            let user = require_user(cli.user.as_deref())?;
            let repo = ApplicationRepository::new(&store, &user);
            match command {
                ApplicationsCommand::List => {
                    for app in repo.load() {
                        println!(
                            "{}  {:?}/{:?}  {}  {} ({})",
                            app.id, app.status, app.priority, app.submitted_date, app.name,
                            app.position
                        );
                    }
                }
                ApplicationsCommand::Add {
                    name,
                    position,
                    applicant,
                    submitted_date,
                    priority,
                    funding,
                    price,
                } => {
                    let applications = repo.add(ApplicationDraft {
                        name,
                        position,
                        applicant,
                        submitted_date,
                        priority: parse_priority(&priority)?,
                        funding,
                        price,
                    })?;
                    println!("added {} ({} total)", applications[0].id, applications.len());
                }
                ApplicationsCommand::SetStatus { id, status } => {
                    repo.change_status(&id, parse_status(&status)?)?;
                    println!("status of {id} set to {status}");
                }
                ApplicationsCommand::Delete { id } => {
                    let remaining = repo.delete(&id)?;
                    println!("deleted {id} ({} remaining)", remaining.len());
                }
            }
        }
        Commands::Opportunities(command) => {
            let repo = OpportunityRepository::new(&store, &registry);
            match command {
                OpportunitiesCommand::List => {
                    let catalog = repo.load_global();
                    let recommended_ids = current_profile(&registry, cli.user.as_deref())?
                        .and_then(|p| p.recommended_opportunity_ids);
                    let (recommended, rest) =
                        partition_by_recommendation(&catalog, recommended_ids.as_deref());
                    if !recommended.is_empty() {
                        println!("recommended for you:");
                        for op in &recommended {
                            println!("  {}  {}  ({})", op.id, op.title, op.company);
                        }
                    }
                    for op in &rest {
                        println!("{}  {}  ({})", op.id, op.title, op.company);
                    }
                }
                OpportunitiesCommand::Add {
                    title,
                    company,
                    description,
                    kind,
                    tags,
                    link,
                    project_stage,
                    sector,
                    business_model,
                    team_size,
                } => {
                    let catalog = repo.add_global(OpportunityDraft {
                        title,
                        company,
                        description,
                        kind,
                        tags,
                        link,
                        project_stage: project_stage
                            .as_deref()
                            .map(parse_project_stage)
                            .transpose()?,
                        sector,
                        business_model,
                        team_size,
                    })?;
                    println!("added {} ({} in catalog)", catalog[0].id, catalog.len());
                }
                OpportunitiesCommand::Delete { id } => {
                    let report = repo.delete_global(&id)?;
                    println!("deleted {id}: {report}");
                }
                OpportunitiesCommand::Save { id } => {
                    let user = require_user(cli.user.as_deref())?;
                    let catalog = repo.load_global();
                    let opportunity = catalog
                        .into_iter()
                        .find(|op| op.id == id)
                        .with_context(|| format!("no opportunity {id} in the catalog"))?;
                    match repo.save_for_user(&user, opportunity)? {
                        SaveOutcome::Saved(saved) => {
                            println!("saved {id} ({} in your list)", saved.len())
                        }
                        SaveOutcome::AlreadySaved => println!("already saved"),
                    }
                }
                OpportunitiesCommand::Unsave { id } => {
                    let user = require_user(cli.user.as_deref())?;
                    let saved = repo.remove_for_user(&user, &id)?;
                    println!("removed {id} ({} remaining)", saved.len());
                }
                OpportunitiesCommand::Saved => {
                    let user = require_user(cli.user.as_deref())?;
                    for op in repo.load_saved(&user) {
                        println!("{}  {}  ({})", op.id, op.title, op.company);
                    }
                }
            }
        }
        Commands::Profiles(command) => match command {
            ProfilesCommand::List => {
                for profile in registry.list_all_profiles()? {
                    println!(
                        "{}  {}  admin={}  recommended={}",
                        profile.id,
                        profile.email,
                        profile.is_admin,
                        profile
                            .recommended_opportunity_ids
                            .map(|ids| ids.join(","))
                            .unwrap_or_default()
                    );
                }
            }
            ProfilesCommand::Create { uid, email } => {
                registry.create_profile(UserProfile::new(&uid, &email))?;
                println!("created profile {uid} ({email})");
            }
            ProfilesCommand::Recommend { uid, ids } => {
                let profile = registry.recommend(&uid, &ids)?;
                println!(
                    "recommended {} ids to {}",
                    profile
                        .recommended_opportunity_ids
                        .map(|ids| ids.len())
                        .unwrap_or(0),
                    profile.email
                );
            }
            ProfilesCommand::SetAdmin { uid, is_admin } => {
                let profile = registry.set_admin(&uid, is_admin)?;
                println!("{} admin={}", profile.email, profile.is_admin);
            }
        },
        Commands::Search {
            keyword,
            region,
            kind,
        } => {
            let gateway = SearchGateway::new(SearchConfig::from_env())?;
            let hits = gateway
                .search(&SearchParams {
                    keyword,
                    region,
                    kind,
                })
                .await?;
            println!("{} result(s)", hits.len());
            for hit in hits {
                println!(
                    "{}  {}  {}",
                    hit.title,
                    hit.kind.unwrap_or_default(),
                    hit.url.unwrap_or_default()
                );
            }
        }
    }

    Ok(())
}

fn require_user(user: Option<&str>) -> Result<String> {
    match user {
        Some(email) if !email.trim().is_empty() => Ok(email.to_string()),
        _ => bail!("a user email is required; pass --user or set AIPPLY_USER"),
    }
}

fn current_profile<P: ProfileService>(
    registry: &P,
    user: Option<&str>,
) -> Result<Option<UserProfile>> {
    let Some(email) = user else { return Ok(None) };
    let profiles = registry.list_all_profiles()?;
    Ok(profiles.into_iter().find(|p| p.email == email))
}

fn parse_status(text: &str) -> Result<ApplicationStatus> {
    match text.to_ascii_lowercase().as_str() {
        "pending" => Ok(ApplicationStatus::Pending),
        "approved" => Ok(ApplicationStatus::Approved),
        "rejected" => Ok(ApplicationStatus::Rejected),
        other => bail!("unknown status {other:?} (expected pending|approved|rejected)"),
    }
}

fn parse_priority(text: &str) -> Result<Priority> {
    match text.to_ascii_lowercase().as_str() {
        "low" => Ok(Priority::Low),
        "medium" => Ok(Priority::Medium),
        "high" => Ok(Priority::High),
        other => bail!("unknown priority {other:?} (expected low|medium|high)"),
    }
}

fn parse_project_stage(text: &str) -> Result<ProjectStage> {
    match text.to_ascii_lowercase().as_str() {
        "ideation" => Ok(ProjectStage::Ideation),
        "prototype" => Ok(ProjectStage::Prototype),
        "mvp_tested" => Ok(ProjectStage::MvpTested),
        "traction" => Ok(ProjectStage::Traction),
        other => bail!("unknown project stage {other:?}"),
    }
}
