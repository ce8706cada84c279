//! Story factory admin CLI.
//!
//! Small operational tool for poking the deployed contracts: create a
//! story game, append a node by hand, make a choice, and inspect what the
//! factory knows.

use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use tales_agent::{ChainConfig, StoryFactory};

#[derive(Parser)]
#[command(name = "story-admin", about = "Inspect and poke the story factory contract")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create a new story game
    Create {
        title: String,
        #[arg(long)]
        theme: Option<String>,
    },
    /// Append a story node by hand
    AddNode {
        #[arg(long)]
        story: u64,
        #[arg(long)]
        content: String,
        /// Explicit follow-up choice indices, comma separated
        #[arg(long, value_delimiter = ',')]
        choices: Option<Vec<u64>>,
    },
    /// Make a choice in a story game
    Choose {
        #[arg(long)]
        story: u64,
        #[arg(long)]
        choice: u64,
    },
    /// List all story games known to the factory
    List,
    /// Print a story's content, by id or by contract address
    Content {
        #[arg(long)]
        story: Option<u64>,
        #[arg(long)]
        address: Option<ethrpc::Address>,
    },
    /// List an author's story games
    AuthorGames { address: ethrpc::Address },
    /// Show a player's current story position
    PlayerState {
        player: ethrpc::Address,
        #[arg(long)]
        story: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = dotenvy::dotenv();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let config = ChainConfig::from_env()?;
    let provider = Arc::new(ethrpc::Provider::connect(&config.rpc_url).await?);
    let factory = StoryFactory::new(provider, config.factory_address, config.agent_account);

    match cli.command {
        Command::Create { title, theme } => {
            let receipt = factory.create_story_game(&title, theme.as_deref()).await?;
            println!("created {title:?} in tx {}", receipt.transaction_hash);
        }
        Command::AddNode {
            story,
            content,
            choices,
        } => {
            let receipt = factory
                .add_story_node(story, &content, choices.as_deref())
                .await?;
            println!("appended node to story {story} in tx {}", receipt.transaction_hash);
        }
        Command::Choose { story, choice } => {
            let receipt = factory.make_choice(story, choice).await?;
            println!("made choice {choice} in story {story}, tx {}", receipt.transaction_hash);
        }
        Command::List => {
            let stories = factory.get_all_stories().await?;
            if stories.is_empty() {
                println!("no story games yet");
            }
            for (id, story) in stories.iter().enumerate() {
                println!("#{id} {:40} {} (owner {})", story.title, story.address, story.owner);
            }
        }
        Command::Content { story, address } => {
            let content = match (story, address) {
                (Some(id), _) => factory.get_all_content_by_story_id(id).await?,
                (None, Some(address)) => factory.get_story_content_by_address(address).await?,
                (None, None) => return Err("pass --story or --address".into()),
            };
            if content.is_empty() {
                println!("story has no content yet");
            }
            for (index, node) in content.iter().enumerate() {
                println!("--- node {index} ---");
                println!("{node}");
            }
        }
        Command::AuthorGames { address } => {
            let count = factory.get_author_story_game_count(address).await?;
            let games = factory.get_author_story_games(address).await?;
            println!("{address} owns {count} story game(s): {games:?}");
        }
        Command::PlayerState { player, story } => {
            let node = match story {
                Some(id) => factory.get_player_story_state(id, player).await?,
                None => factory.player_story_state(player).await?,
            };
            println!("{player} is at node {node}");
        }
    }
    Ok(())
}
