//! Typed surface over the story factory contract, plus the backend trait
//! the orchestrator is written against.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ethrpc::abi::{ParamType, Token};
use ethrpc::{Address, Contract, Log, Provider, TransactionReceipt, H256, U256};
use tokio::sync::mpsc;

use crate::error::ConnectionError;

const DEFAULT_CONFIRM_TIMEOUT: Duration = Duration::from_secs(120);

/// One entry of the factory's story listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorySummary {
    pub address: Address,
    pub title: String,
    pub owner: Address,
}

/// The story factory contract, with the agent's sender account bound in.
#[derive(Clone)]
pub struct StoryFactory {
    contract: Contract,
    sender: Address,
    confirm_timeout: Duration,
}

impl StoryFactory {
    pub fn new(provider: Arc<Provider>, address: Address, sender: Address) -> Self {
        Self {
            contract: Contract::new(provider, address),
            sender,
            confirm_timeout: DEFAULT_CONFIRM_TIMEOUT,
        }
    }

    pub fn with_confirm_timeout(mut self, timeout: Duration) -> Self {
        self.confirm_timeout = timeout;
        self
    }

    pub fn address(&self) -> Address {
        self.contract.address()
    }

    pub fn provider(&self) -> &Provider {
        self.contract.provider()
    }

    pub async fn get_all_stories(&self) -> Result<Vec<StorySummary>, ethrpc::Error> {
        let shape = ParamType::Array(Box::new(ParamType::Tuple(vec![
            ParamType::Address,
            ParamType::String,
            ParamType::Address,
        ])));
        let tokens = self.contract.call("getAllStories()", &[], &[shape]).await?;
        let entries = first_array(tokens, "getAllStories")?;

        entries
            .into_iter()
            .map(|entry| {
                let mut fields = entry
                    .into_tuple()
                    .ok_or_else(|| shape_error("getAllStories", "expected tuple entry"))?
                    .into_iter();
                Ok(StorySummary {
                    address: address_field(fields.next(), "getAllStories")?,
                    title: string_field(fields.next(), "getAllStories")?,
                    owner: address_field(fields.next(), "getAllStories")?,
                })
            })
            .collect()
    }

    pub async fn get_all_content_by_story_id(
        &self,
        story_game_id: u64,
    ) -> Result<Vec<String>, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "getAllContentByStoryId(uint256)",
                &[Token::Uint(U256::from(story_game_id))],
                &[ParamType::Array(Box::new(ParamType::String))],
            )
            .await?;
        string_array(tokens, "getAllContentByStoryId")
    }

    pub async fn get_story_content_by_address(
        &self,
        story_game: Address,
    ) -> Result<Vec<String>, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "getStoryContentByStoryAddress(address)",
                &[Token::Address(story_game)],
                &[ParamType::Array(Box::new(ParamType::String))],
            )
            .await?;
        string_array(tokens, "getStoryContentByStoryAddress")
    }

    pub async fn get_author_story_game_count(&self, author: Address) -> Result<u64, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "getAuthorStoryGameCount(address)",
                &[Token::Address(author)],
                &[ParamType::Uint],
            )
            .await?;
        uint_result(tokens, "getAuthorStoryGameCount")
    }

    pub async fn get_author_story_games(&self, author: Address) -> Result<Vec<u64>, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "getAuthorStoryGames(address)",
                &[Token::Address(author)],
                &[ParamType::Array(Box::new(ParamType::Uint))],
            )
            .await?;
        first_array(tokens, "getAuthorStoryGames")?
            .into_iter()
            .map(|token| {
                token
                    .as_u64()
                    .ok_or_else(|| shape_error("getAuthorStoryGames", "id does not fit in 64 bits"))
            })
            .collect()
    }

    /// The player's position via the single-argument revision.
    pub async fn player_story_state(&self, player: Address) -> Result<u64, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "playerStoryState(address)",
                &[Token::Address(player)],
                &[ParamType::Uint],
            )
            .await?;
        uint_result(tokens, "playerStoryState")
    }

    /// The player's position within one story game (newer revision).
    pub async fn get_player_story_state(
        &self,
        story_game_id: u64,
        player: Address,
    ) -> Result<u64, ethrpc::Error> {
        let tokens = self
            .contract
            .call(
                "getPlayerStoryState(uint256,address)",
                &[Token::Uint(U256::from(story_game_id)), Token::Address(player)],
                &[ParamType::Uint],
            )
            .await?;
        uint_result(tokens, "getPlayerStoryState")
    }

    pub async fn create_story_game(
        &self,
        title: &str,
        theme: Option<&str>,
    ) -> Result<TransactionReceipt, ethrpc::Error> {
        let pending = match theme {
            Some(theme) => {
                self.contract
                    .send(
                        self.sender,
                        "createStoryGame(string,string)",
                        &[
                            Token::String(title.to_string()),
                            Token::String(theme.to_string()),
                        ],
                    )
                    .await?
            }
            None => {
                self.contract
                    .send(
                        self.sender,
                        "createStoryGame(string)",
                        &[Token::String(title.to_string())],
                    )
                    .await?
            }
        };
        pending.wait(self.confirm_timeout).await
    }

    /// Submit `addStoryNode` without waiting for inclusion.
    pub async fn submit_story_node(
        &self,
        story_game_id: u64,
        content: &str,
        choices: Option<&[u64]>,
    ) -> Result<H256, ethrpc::Error> {
        let pending = match choices {
            Some(choices) => {
                let indices = choices
                    .iter()
                    .map(|c| Token::Uint(U256::from(*c)))
                    .collect::<Vec<_>>();
                self.contract
                    .send(
                        self.sender,
                        "addStoryNode(uint256,string,uint256[])",
                        &[
                            Token::Uint(U256::from(story_game_id)),
                            Token::String(content.to_string()),
                            Token::Array(indices),
                        ],
                    )
                    .await?
            }
            None => {
                self.contract
                    .send(
                        self.sender,
                        "addStoryNode(uint256,string)",
                        &[
                            Token::Uint(U256::from(story_game_id)),
                            Token::String(content.to_string()),
                        ],
                    )
                    .await?
            }
        };
        Ok(pending.hash())
    }

    /// Submit and confirm `addStoryNode`.
    pub async fn add_story_node(
        &self,
        story_game_id: u64,
        content: &str,
        choices: Option<&[u64]>,
    ) -> Result<TransactionReceipt, ethrpc::Error> {
        let hash = self.submit_story_node(story_game_id, content, choices).await?;
        self.provider()
            .wait_for_receipt(hash, self.confirm_timeout)
            .await
    }

    pub async fn make_choice(
        &self,
        story_game_id: u64,
        choice: u64,
    ) -> Result<TransactionReceipt, ethrpc::Error> {
        let pending = self
            .contract
            .send(
                self.sender,
                "makeChoice(uint256,uint256)",
                &[
                    Token::Uint(U256::from(story_game_id)),
                    Token::Uint(U256::from(choice)),
                ],
            )
            .await?;
        pending.wait(self.confirm_timeout).await
    }
}

/// The chain surface the orchestrator needs, as a seam for tests.
#[async_trait]
pub trait StoryBackend: Send + Sync {
    /// Open the log stream for the factory contract. The stream ends when
    /// the connection is closed.
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Log>, ConnectionError>;

    /// Current chain head, used by the connection health check.
    async fn chain_head(&self) -> Result<u64, ethrpc::Error>;

    /// The player's current on-chain node.
    async fn player_position(
        &self,
        story_game_id: Option<u64>,
        player: Address,
    ) -> Result<u64, ethrpc::Error>;

    /// All node content of a story so far, oldest first.
    async fn story_content(
        &self,
        story_game_id: Option<u64>,
        story_game: Option<Address>,
    ) -> Result<Vec<String>, ethrpc::Error>;

    /// Resolve the factory-assigned id of a story game contract, if the
    /// factory lists it.
    async fn find_story_id(&self, story_game: Address) -> Result<Option<u64>, ethrpc::Error>;

    /// Submit a node write, returning the transaction hash.
    async fn submit_node(&self, story_game_id: u64, content: &str) -> Result<H256, ethrpc::Error>;

    /// Wait for inclusion of a previously submitted write.
    async fn confirm(&self, hash: H256) -> Result<TransactionReceipt, ethrpc::Error>;

    /// Release the connection. Must be safe to call more than once.
    async fn close(&self);
}

/// Production backend talking to the factory over JSON-RPC.
pub struct OnChainBackend {
    factory: StoryFactory,
}

impl OnChainBackend {
    pub fn new(factory: StoryFactory) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl StoryBackend for OnChainBackend {
    async fn subscribe(&self) -> Result<mpsc::UnboundedReceiver<Log>, ConnectionError> {
        let subscription = self
            .factory
            .provider()
            .subscribe_logs(self.factory.address())
            .await
            .map_err(ConnectionError::Node)?;
        Ok(subscription.into_receiver())
    }

    async fn chain_head(&self) -> Result<u64, ethrpc::Error> {
        self.factory.provider().block_number().await
    }

    async fn player_position(
        &self,
        story_game_id: Option<u64>,
        player: Address,
    ) -> Result<u64, ethrpc::Error> {
        match story_game_id {
            Some(id) => match self.factory.get_player_story_state(id, player).await {
                Ok(position) => Ok(position),
                // Older factories only expose the single-argument form.
                Err(ethrpc::Error::Rpc { .. }) => self.factory.player_story_state(player).await,
                Err(e) => Err(e),
            },
            None => self.factory.player_story_state(player).await,
        }
    }

    async fn story_content(
        &self,
        story_game_id: Option<u64>,
        story_game: Option<Address>,
    ) -> Result<Vec<String>, ethrpc::Error> {
        match (story_game_id, story_game) {
            (Some(id), _) => self.factory.get_all_content_by_story_id(id).await,
            (None, Some(address)) => self.factory.get_story_content_by_address(address).await,
            (None, None) => Err(ethrpc::Error::Decode(
                "story content requested without a story reference".to_string(),
            )),
        }
    }

    async fn find_story_id(&self, story_game: Address) -> Result<Option<u64>, ethrpc::Error> {
        let stories = self.factory.get_all_stories().await?;
        Ok(stories
            .iter()
            .position(|summary| summary.address == story_game)
            .map(|index| index as u64))
    }

    async fn submit_node(&self, story_game_id: u64, content: &str) -> Result<H256, ethrpc::Error> {
        self.factory.submit_story_node(story_game_id, content, None).await
    }

    async fn confirm(&self, hash: H256) -> Result<TransactionReceipt, ethrpc::Error> {
        self.factory
            .provider()
            .wait_for_receipt(hash, self.factory.confirm_timeout)
            .await
    }

    async fn close(&self) {
        self.factory.provider().close();
    }
}

fn shape_error(method: &str, reason: &str) -> ethrpc::Error {
    ethrpc::Error::Decode(format!("{method} returned unexpected data: {reason}"))
}

fn first_array(tokens: Vec<Token>, method: &str) -> Result<Vec<Token>, ethrpc::Error> {
    tokens
        .into_iter()
        .next()
        .and_then(Token::into_array)
        .ok_or_else(|| shape_error(method, "expected an array"))
}

fn string_array(tokens: Vec<Token>, method: &str) -> Result<Vec<String>, ethrpc::Error> {
    first_array(tokens, method)?
        .into_iter()
        .map(|token| {
            token
                .into_string()
                .ok_or_else(|| shape_error(method, "expected string entries"))
        })
        .collect()
}

fn uint_result(tokens: Vec<Token>, method: &str) -> Result<u64, ethrpc::Error> {
    tokens
        .first()
        .and_then(Token::as_u64)
        .ok_or_else(|| shape_error(method, "expected a uint"))
}

fn address_field(token: Option<Token>, method: &str) -> Result<Address, ethrpc::Error> {
    token
        .and_then(|t| t.as_address())
        .ok_or_else(|| shape_error(method, "expected an address field"))
}

fn string_field(token: Option<Token>, method: &str) -> Result<String, ethrpc::Error> {
    token
        .and_then(Token::into_string)
        .ok_or_else(|| shape_error(method, "expected a string field"))
}
