use anyhow::Result;
use blurblog_backend::collaborators::Collaborators;
use blurblog_backend::config::BlurblogConfig;
use blurblog_backend::node::BlurblogNode;
use blurblog_backend::profiles::Projection;
use blurblog_backend::telemetry;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(author, version, about = "Blurblog social graph and share index")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the node with periodic index repair until Ctrl-C
    Serve,
    /// Run one invariant repair pass and print the report
    Resync,
    /// Print a profile
    Profile {
        user_id: i64,
        #[arg(long, default_value = "standard")]
        projection: Projection,
    },
    /// Make one user follow another
    Follow { follower: i64, followee: i64 },
    /// Make one user unfollow another
    Unfollow { follower: i64, followee: i64 },
}

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let args = Args::parse();
    let mut config = BlurblogConfig::from_env()?;
    let command = args.command.unwrap_or(Command::Serve);
    if !matches!(command, Command::Serve) {
        // One-shot commands do not need the background task.
        config.repair.interval = None;
        config.repair.on_start = false;
    }

    let node = BlurblogNode::start(config, Collaborators::default()).await?;
    let services = node.services().clone();

    match command {
        Command::Serve => {
            tracing::info!("serving; press Ctrl-C to stop");
            tokio::signal::ctrl_c().await?;
        }
        Command::Resync => {
            let report = node.repair_now().await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Profile {
            user_id,
            projection,
        } => match services.profiles.view(user_id, projection)? {
            Some(view) => println!("{}", serde_json::to_string_pretty(&view)?),
            None => println!("no profile for user {user_id}"),
        },
        Command::Follow { follower, followee } => {
            let outcome = services.profiles.follow(follower, followee, false)?;
            println!("{}", serde_json::to_string(&outcome)?);
        }
        Command::Unfollow { follower, followee } => {
            let was_following = services.profiles.unfollow(follower, followee)?;
            println!("was_following: {was_following}");
        }
    }

    node.shutdown().await;
    Ok(())
}
